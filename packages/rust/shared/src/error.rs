//! Error types for OrgBrief.
//!
//! Library crates use [`OrgBriefError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all OrgBrief operations.
#[derive(Debug, thiserror::Error)]
pub enum OrgBriefError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP failure talking to the completion service.
    #[error("transport error: {0}")]
    Transport(String),

    /// Model output that does not match the expected shape.
    #[error("malformed output: {message}")]
    MalformedOutput { message: String },

    /// Entity, document, partition row or template missing.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Every attempt of a completion call failed.
    #[error("completion failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<OrgBriefError>,
    },

    /// The persisted work queue cannot be trusted.
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Report rendering error.
    #[error("render error: {0}")]
    Render(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad submission, bad schema, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OrgBriefError>;

impl OrgBriefError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-output error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: msg.into(),
        }
    }

    /// Create a not-found error describing what was missing.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the completion client should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::MalformedOutput { .. })
    }

    /// Whether this error means the subject simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
