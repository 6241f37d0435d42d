//! Error types for the orchestrator.

use std::time::Duration;

use uuid::Uuid;

use crate::jobs::model::{FailureKind, JobStatus};

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job lifecycle errors returned synchronously to callers.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job submission: {0}")]
    Validation(String),

    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} is {state}, cannot {action}")]
    InvalidState {
        id: Uuid,
        state: JobStatus,
        action: String,
    },
}

/// Artifact registry errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Invalid artifact: {0}")]
    Validation(String),

    #[error("Artifact {id} not found")]
    NotFound { id: Uuid },
}

/// Handler registry errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No handler registered for job type '{job_type}'")]
    UnregisteredType { job_type: String },

    #[error("Invalid dispatch target for '{job_type}': {reason}")]
    InvalidTarget { job_type: String, reason: String },
}

/// Errors raised by a local handler while executing a job.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Missing required payload field '{0}'")]
    MissingField(String),

    #[error("Invalid payload field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Worker pool task failed: {0}")]
    Worker(String),
}

/// Errors from calling a remote handler service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Malformed response from {url}: {message}")]
    Protocol { url: String, message: String },
}

impl RemoteError {
    /// Failure kind recorded on the job.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Protocol { .. } => FailureKind::Protocol,
            _ => FailureKind::RemoteCall,
        }
    }
}
