use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::service::{ExecutionStatistics, ExecutionStatus, ServiceState};
use crate::timestamp::UtcDateTime;

/// Identifier the query service assigns on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

impl Display for ExecutionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ServiceState> for ExecutionState {
    fn from(state: ServiceState) -> Self {
        match state {
            ServiceState::Queued => Self::Submitted,
            ServiceState::Running => Self::Running,
            ServiceState::Succeeded => Self::Succeeded,
            ServiceState::Failed => Self::Failed,
            ServiceState::Cancelled => Self::Cancelled,
        }
    }
}

/// Local record of one submitted query.
///
/// State changes only through [`QueryExecution::observe`] (a poll result) or
/// a local timeout, and never once a terminal state was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryExecution {
    id: ExecutionId,
    state: ExecutionState,
    submitted_at: UtcDateTime,
    completed_at: Option<UtcDateTime>,
    result_location: Option<String>,
    failure_reason: Option<String>,
    statistics: Option<ExecutionStatistics>,
}

impl QueryExecution {
    pub(crate) fn submitted(id: ExecutionId) -> Self {
        Self {
            id,
            state: ExecutionState::Submitted,
            submitted_at: UtcDateTime::now(),
            completed_at: None,
            result_location: None,
            failure_reason: None,
            statistics: None,
        }
    }

    /// Apply a poll result. Returns `true` when the state changed.
    pub(crate) fn observe(&mut self, status: &ExecutionStatus) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        let next = ExecutionState::from(status.state);
        if status.result_location.is_some() {
            self.result_location.clone_from(&status.result_location);
        }
        if status.statistics.is_some() {
            self.statistics = status.statistics;
        }
        if next.is_terminal() {
            self.failure_reason.clone_from(&status.failure_reason);
            self.completed_at = Some(UtcDateTime::now());
        }

        let changed = next != self.state;
        self.state = next;
        changed
    }

    pub(crate) fn mark_timed_out(&mut self) {
        if !self.state.is_terminal() {
            self.state = ExecutionState::TimedOut;
            self.completed_at = Some(UtcDateTime::now());
        }
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn submitted_at(&self) -> UtcDateTime {
        self.submitted_at
    }

    pub fn completed_at(&self) -> Option<UtcDateTime> {
        self.completed_at
    }

    pub fn result_location(&self) -> Option<&str> {
        self.result_location.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn statistics(&self) -> Option<ExecutionStatistics> {
        self.statistics
    }
}
