//! Error types for remote dispatch

use std::time::Duration;

use stem_core::EnvelopeError;
use thiserror::Error;

/// Result type alias using RemoteError
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors seen by clients of units and distributors
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection or socket failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Response could not be framed
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Connect, read or write exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Peer answered with a `failed` status
    #[error("{message}")]
    Failed { message: String },

    /// Successful response without an expected key
    #[error("response is missing '{0}'")]
    MissingKey(String),
}

impl RemoteError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
