//! Error types for the backfill tool.
//!
//! Library crates use [`BackfillError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all backfill operations.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A read against the document store failed (full scan or chunk lookup).
    #[error("read failed: {0}")]
    Read(String),

    /// The bulk write could not be committed. Nothing was applied.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Opening or migrating the database failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed input (oversized IN list, bad import file, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BackfillError>;

impl BackfillError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a read error from any displayable message.
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Create a commit error from any displayable message.
    pub fn commit(msg: impl Into<String>) -> Self {
        Self::Commit(msg.into())
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
}
