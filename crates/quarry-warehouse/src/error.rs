use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening the local warehouse.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("data root {} is not a directory", path.display())]
    InvalidDataRoot { path: PathBuf },

    #[error("'{0}' is not a valid database or table name")]
    InvalidIdentifier(String),
}
