//! Error types for external tool invocations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for collaborator operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors raised while driving an external tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("{what} exited with code {code:?}: {stderr}")]
    Failed {
        what: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from {what}: {message}")]
    Parse { what: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
