//! Contract of the asynchronous query service (Athena-style).
//!
//! | Operation | Returns |
//! |-----------|---------|
//! | `submit` | execution id |
//! | `poll` | [`ExecutionStatus`] |
//! | `fetch` | one [`ResultPage`] |
//! | `cancel` | best-effort cancellation |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::ExecutionId;
use crate::template::QueryRequest;
use crate::validator::AcceptedQuery;

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Service-side error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// The request itself is wrong: authorization, malformed SQL, quota.
    Rejected,
    Unavailable,
    Throttled,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    kind: ServiceErrorKind,
    message: String,
    retryable: bool,
}

impl ServiceError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Rejected,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Throttled,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ServiceErrorKind::Rejected => "service.rejected",
            ServiceErrorKind::Unavailable => "service.unavailable",
            ServiceErrorKind::Throttled => "service.throttled",
            ServiceErrorKind::NotFound => "service.not_found",
            ServiceErrorKind::Internal => "service.internal",
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ServiceError {}

/// What the executor hands to the service. Built only from an
/// [`AcceptedQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    sql: String,
    database: String,
    result_location: String,
    workgroup: String,
}

impl Submission {
    pub(crate) fn new(query: &AcceptedQuery, request: &QueryRequest, workgroup: &str) -> Self {
        Self {
            sql: query.sql().to_string(),
            database: request.database().to_string(),
            result_location: request.result_location().to_string(),
            workgroup: workgroup.to_string(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn result_location(&self) -> &str {
        &self.result_location
    }

    pub fn workgroup(&self) -> &str {
        &self.workgroup
    }
}

/// Execution state as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ServiceState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub data_scanned_bytes: u64,
    pub engine_execution_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStatus {
    pub state: ServiceState,
    pub failure_reason: Option<String>,
    pub result_location: Option<String>,
    pub statistics: Option<ExecutionStatistics>,
}

impl ExecutionStatus {
    pub const fn new(state: ServiceState) -> Self {
        Self {
            state,
            failure_reason: None,
            result_location: None,
            statistics: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(ServiceState::Failed).with_failure_reason(reason)
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn with_result_location(mut self, location: impl Into<String>) -> Self {
        self.result_location = Some(location.into());
        self
    }

    pub fn with_statistics(mut self, statistics: ExecutionStatistics) -> Self {
        self.statistics = Some(statistics);
        self
    }
}

/// Column metadata for result rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Opaque continuation token for paginated results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(pub String);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
    pub next_token: Option<PageToken>,
}

/// Asynchronous query service consumed by the executor.
pub trait QueryService: Send + Sync {
    fn submit<'a>(&'a self, submission: Submission) -> ServiceFuture<'a, ExecutionId>;

    fn poll<'a>(&'a self, execution_id: &'a ExecutionId) -> ServiceFuture<'a, ExecutionStatus>;

    fn fetch<'a>(
        &'a self,
        execution_id: &'a ExecutionId,
        page_token: Option<PageToken>,
        max_results: usize,
    ) -> ServiceFuture<'a, ResultPage>;

    fn cancel<'a>(&'a self, execution_id: &'a ExecutionId) -> ServiceFuture<'a, ()>;
}

/// Render a cell the way it appears in text output.
pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ServiceError::unavailable("s3 read timed out").retryable());
        assert!(ServiceError::throttled("rate exceeded").retryable());
        assert!(!ServiceError::rejected("AccessDenied").retryable());
        assert!(!ServiceError::not_found("no such execution").retryable());
        assert_eq!(ServiceError::rejected("x").code(), "service.rejected");
    }

    #[test]
    fn terminal_states() {
        assert!(!ServiceState::Queued.is_terminal());
        assert!(!ServiceState::Running.is_terminal());
        assert!(ServiceState::Succeeded.is_terminal());
        assert!(ServiceState::Failed.is_terminal());
        assert!(ServiceState::Cancelled.is_terminal());
    }

    #[test]
    fn formats_cells_for_text_output() {
        assert_eq!(format_cell(&Value::Null), "");
        assert_eq!(format_cell(&Value::String("acct_042".into())), "acct_042");
        assert_eq!(format_cell(&serde_json::json!(12)), "12");
    }
}
