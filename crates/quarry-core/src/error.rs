use std::path::PathBuf;

use thiserror::Error;

use crate::execution::{ExecutionId, ExecutionState, QueryExecution};
use crate::service::ServiceError;

/// Local, pre-submission errors. None of these ever reach the query service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("write operation detected: {keyword}; only read-only queries are allowed")]
    WriteOperationDetected { keyword: String },

    #[error("missing partition filter: {detail}")]
    MissingPartitionFilter { detail: String },

    #[error("unresolved placeholder '${name}': no value supplied for it")]
    UnresolvedPlaceholder { name: String },
}

impl ValidationError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::WriteOperationDetected { .. } => "validation.write_operation",
            Self::MissingPartitionFilter { .. } => "validation.missing_partition_filter",
            Self::UnresolvedPlaceholder { .. } => "validation.unresolved_placeholder",
        }
    }
}

/// Errors raised while loading saved query templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{name}' must start with a `--` comment block declaring its purpose")]
    MissingHeader { name: String },

    #[error("template not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of one executor invocation after validation succeeded.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The service refused the submission. Never retried.
    #[error("submission failed: {0}")]
    Submission(ServiceError),

    /// A non-retryable error while polling execution status.
    #[error("polling execution {execution_id} failed: {source}")]
    Poll {
        execution_id: ExecutionId,
        source: ServiceError,
    },

    /// The poll deadline passed before a terminal state was observed.
    #[error(
        "execution {execution_id} was still {last_state} after {waited_ms}ms; it may still complete, re-check it later"
    )]
    PollTimeout {
        execution_id: ExecutionId,
        last_state: ExecutionState,
        waited_ms: u64,
        execution: Box<QueryExecution>,
    },

    /// Result retrieval kept failing after the bounded retry budget.
    #[error("fetching results of {execution_id} failed after {attempts} attempt(s): {source}")]
    Fetch {
        execution_id: ExecutionId,
        attempts: u32,
        source: ServiceError,
    },

    /// The operator aborted the invocation before it completed.
    #[error("execution {execution_id} aborted (cancellation requested: {cancel_requested})")]
    Aborted {
        execution_id: ExecutionId,
        cancel_requested: bool,
    },
}

impl ExecutionError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Submission(_) => "execution.submission_failed",
            Self::Poll { .. } => "execution.poll_failed",
            Self::PollTimeout { .. } => "execution.poll_timeout",
            Self::Fetch { .. } => "execution.fetch_failed",
            Self::Aborted { .. } => "execution.aborted",
        }
    }

    pub fn execution_id(&self) -> Option<&ExecutionId> {
        match self {
            Self::Submission(_) => None,
            Self::Poll { execution_id, .. }
            | Self::PollTimeout { execution_id, .. }
            | Self::Fetch { execution_id, .. }
            | Self::Aborted { execution_id, .. } => Some(execution_id),
        }
    }
}

/// Errors from the local schema store and output retention files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("schema for table '{table}' has no columns")]
    EmptySchema { table: String },

    #[error("retention cap must be greater than zero")]
    InvalidRetentionCap,
}

/// Configuration values that cannot drive the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Error surfaced by one investigation-session invocation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The query service reported the query failed or was cancelled.
    /// The reason is the service's message, unmodified.
    #[error("query {state}: {reason}")]
    ServiceReportedFailure {
        execution_id: ExecutionId,
        state: ExecutionState,
        reason: String,
        artifact: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
}

impl SessionError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(error) => error.code(),
            Self::Execution(error) => error.code(),
            Self::ServiceReportedFailure { .. } => "service.reported_failure",
            Self::Store(_) => "store.io",
            Self::Config(_) => "config.invalid",
            Self::InvalidTableName(_) => "session.invalid_table_name",
        }
    }
}
