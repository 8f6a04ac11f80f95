use op_workflow_core::{Error, ExecutionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unknown execution id: {0}")]
    NotFound(ExecutionId),
    #[error("Transaction error: {0}")]
    Transaction(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StateStoreError>;

impl StateStoreError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StateStoreError::Database(_) => "database",
            StateStoreError::Serialization(_) => "serialization",
            StateStoreError::NotFound(_) => "not_found",
            StateStoreError::Transaction(_) => "transaction",
            StateStoreError::Corrupt(_) => "corrupt",
        }
    }
}

impl From<StateStoreError> for Error {
    fn from(err: StateStoreError) -> Self {
        match err {
            StateStoreError::NotFound(id) => Error::NotFound(id),
            StateStoreError::Serialization(e) => Error::Serialization(e),
            other => Error::persistence(other.to_string()),
        }
    }
}
