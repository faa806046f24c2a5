//! Error types for phaselog-state

use thiserror::Error;

/// Errors surfaced by the execution registry and log source collaborators.
#[derive(Error, Debug)]
pub enum StateError {
    /// Execution does not exist (or vanished mid-stream)
    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    /// No log is available for the requested producer
    #[error("log not found for execution {execution_id}, container {container}")]
    LogNotFound {
        execution_id: String,
        container: String,
    },

    /// Backend could not be reached or refused the request
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Stored record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    /// True for the 404-equivalent variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StateError::ExecutionNotFound { .. } | StateError::LogNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Corrupt(err.to_string())
    }
}
