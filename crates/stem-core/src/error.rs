//! Error types for Stem

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias using StemError
pub type Result<T> = std::result::Result<T, StemError>;

/// Main error type for Stem operations
#[derive(Debug, Error)]
pub enum StemError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Envelope framing errors
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Task lookup errors
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading or writing envelopes
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Header bytes did not match the envelope layout
    #[error("Not Envelope format: {0}")]
    Malformed(String),

    /// Meta block was not a JSON object
    #[error("Envelope meta is not valid JSON: {0}")]
    Meta(#[from] serde_json::Error),

    /// Meta or payload does not fit a 32-bit length field
    #[error("Envelope section too large: {0} bytes")]
    TooLarge(usize),

    /// Underlying stream failure (including truncated input)
    #[error("Envelope IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task and workspace lookup errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No task at the given path
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// No workspace with the given name
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
}

/// A transform failure surfaced when a deferred result is read.
///
/// Wrapped in an `Arc` so the cached failure can be handed out repeatedly.
#[derive(Debug, Error, Clone)]
#[error("{0:#}")]
pub struct InvocationError(pub(crate) Arc<anyhow::Error>);

impl InvocationError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for InvocationError {
    fn from(e: anyhow::Error) -> Self {
        InvocationError(Arc::new(e))
    }
}

impl StemError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
