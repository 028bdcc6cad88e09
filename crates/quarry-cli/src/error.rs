use quarry_core::{ConfigError, SessionError, StoreError, TemplateError, ValidationError};
use quarry_warehouse::WarehouseError;
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to open local warehouse: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Template(_) | Self::Command(_) | Self::Config(_) => 2,
            Self::Session(error) => match error {
                SessionError::Validation(_)
                | SessionError::Config(_)
                | SessionError::InvalidTableName(_) => 2,
                SessionError::ServiceReportedFailure { .. } => 3,
                SessionError::Execution(_) => 4,
                SessionError::Store(_) => 10,
            },
            Self::Warehouse(_) | Self::Serialization(_) => 4,
            Self::Store(_) | Self::Io(_) => 10,
        }
    }

    /// Stable machine-readable code, when the error carries one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Validation(error) => Some(error.code()),
            Self::Session(error) => Some(error.code()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use quarry_core::{ExecutionError, ExecutionId, ExecutionState, ServiceError};

    use super::*;

    #[test]
    fn maps_error_kinds_to_exit_codes() {
        let rejected = CliError::Validation(ValidationError::WriteOperationDetected {
            keyword: String::from("DROP"),
        });
        assert_eq!(rejected.exit_code(), 2);
        assert_eq!(rejected.code(), Some("validation.write_operation"));

        let failed = CliError::Session(SessionError::ServiceReportedFailure {
            execution_id: ExecutionId::new("exec-1"),
            state: ExecutionState::Failed,
            reason: String::from("SYNTAX_ERROR"),
            artifact: String::from("query_20260115_103000_0000.txt"),
        });
        assert_eq!(failed.exit_code(), 3);

        let submission = CliError::Session(SessionError::Execution(ExecutionError::Submission(
            ServiceError::rejected("AccessDenied"),
        )));
        assert_eq!(submission.exit_code(), 4);

        let io = CliError::Io(std::io::Error::other("disk full"));
        assert_eq!(io.exit_code(), 10);
    }
}
