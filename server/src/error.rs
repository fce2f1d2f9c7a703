//! Error types for the TaskSync server.
//!
//! # Error Types
//!
//! - [`SyncError`] - Failures in the file-change pipeline and viewer requests
//!
//! Configuration errors live next to the loader in [`crate::config`].
//!
//! # Propagation
//!
//! Errors raised while processing a background file notification are logged
//! and dropped so the pipeline keeps running. Errors raised by a
//! viewer-initiated request are turned into an `error` message for that
//! viewer only (see [`SyncError::viewer_message`]). A failed send to a viewer
//! is never an error value: the hub simply drops the viewer.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level error type for pipeline and request handling.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A viewer submitted invalid data (e.g. an empty task description).
    #[error("validation error: {0}")]
    Validation(String),

    /// A watched file could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The filesystem watcher could not be created or attached.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A viewer frame could not be decoded into a known message kind.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Creates a new validation error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tasksync_server::error::SyncError;
    ///
    /// let err = SyncError::validation("Task description is required");
    /// assert!(matches!(err, SyncError::Validation(_)));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns `true` if the viewer caused this error.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Protocol(_))
    }

    /// The text sent back to a viewer in an `error` message.
    ///
    /// Validation failures are reported verbatim; everything else is
    /// prefixed with the operation that failed.
    pub fn viewer_message(&self, operation: &str) -> String {
        match self {
            Self::Validation(msg) | Self::Protocol(msg) => msg.clone(),
            other => format!("Error {operation}: {other}"),
        }
    }
}

/// A specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, SyncError>;
