use flint::FlintError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("storage error: {0}")]
    Storage(#[from] FlintError),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("planning error: {0}")]
    Planning(String),

    #[error("execution error: {0}")]
    Internal(String),
}
