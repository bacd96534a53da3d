//! Crate-wide error type and result alias.

use thiserror::Error;

/// Errors produced by the orchestration engine.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Input failed validation before any resource was touched.
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation conflicts with the instance's current status
    /// (e.g. starting an instance that is already running).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A required image is not present locally; the caller must pull it
    /// before the operation can proceed.
    #[error("missing required images: {0:?}")]
    MissingImages(Vec<String>),

    /// Error from the Docker Engine API.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// A command executed inside a container exited non-zero.
    /// The captured output is still usable.
    #[error("command exited with code {exit_code}")]
    CommandFailed { exit_code: i64, output: String },

    /// Requested instance or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A bounded wait exhausted its polling cap.
    #[error("timed out: {0}")]
    Timeout(String),

    /// One or more compensating actions failed during rollback.
    /// Never raised over the original provisioning error; surfaced only
    /// through logs and the aggregate message.
    #[error("rollback completed with {} failure(s): {failures:?}", failures.len())]
    Rollback { failures: Vec<String> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// True when the underlying Docker API response was a 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            OrchestratorError::NotFound(_) => true,
            OrchestratorError::Docker(e) => docker_not_found(e),
            _ => false,
        }
    }
}

/// Check whether a bollard error is a daemon-side 404.
pub(crate) fn docker_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}
