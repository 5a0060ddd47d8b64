//! Deploy pipeline error types.

use std::fmt;

use thiserror::Error;

use hoist_state::StateError;

/// Step of the pipeline that a delegated tool failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Supervisor,
    HealthCheck,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Extract => "extract",
            Self::Supervisor => "supervisor",
            Self::HealthCheck => "health check",
        })
    }
}

/// Errors that can occur during deploy and lifecycle operations.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{stage} failed: {message}")]
    Upstream {
        stage: Stage,
        message: String,
        /// The previous release was reinstated before this error surfaced.
        rolled_back: bool,
    },

    #[error("registry error: {0}")]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DeployError {
    pub fn upstream(stage: Stage, error: impl fmt::Display) -> Self {
        Self::Upstream {
            stage,
            message: error.to_string(),
            rolled_back: false,
        }
    }

    pub fn rolled_back(&self) -> bool {
        matches!(self, Self::Upstream { rolled_back: true, .. })
    }

    /// Mark an upstream failure as having been rolled back.
    pub(crate) fn into_rolled_back(self) -> Self {
        match self {
            Self::Upstream { stage, message, .. } => Self::Upstream {
                stage,
                message,
                rolled_back: true,
            },
            other => other,
        }
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
