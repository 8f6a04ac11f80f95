//! Error types for op-workflow

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::ExecutionId;

/// Main error type for op-workflow operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown execution id: {0}")]
    NotFound(ExecutionId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot resolve trace path '{path}': {reason}")]
    UnresolvedTracePath { path: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an unresolved trace path error
    pub fn unresolved_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnresolvedTracePath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether this is the expected "unknown execution id" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(format!("{:#}", err))
    }
}

/// Failure reported by the interpretation engine.
///
/// Cheap to clone so the same failure can be handed to every party awaiting
/// an execution. The underlying `anyhow::Error` keeps the causal chain.
#[derive(Clone)]
pub struct ExecutionFailure(Arc<anyhow::Error>);

impl ExecutionFailure {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(anyhow::Error::msg(message))
    }

    /// Human-readable description including every cause, outermost first.
    pub fn summary(&self) -> String {
        let mut chain = self.0.chain();
        let mut summary = chain.next().map(|e| e.to_string()).unwrap_or_default();
        for cause in chain {
            summary.push_str("\ncaused by: ");
            summary.push_str(&cause.to_string());
        }
        summary
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecutionFailure({:?})", self.0)
    }
}

impl From<anyhow::Error> for ExecutionFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}
