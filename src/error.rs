//! Error types for the state box.

use thiserror::Error;

/// Error returned by an action body.
pub type ActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument at index {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Action `{action}` failed: {source}")]
    Action {
        action: String,
        #[source]
        source: ActionError,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
