//! Job record and lifecycle state machine.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::JobError;

/// Cap on the per-job transition history.
const MAX_TRANSITIONS: usize = 50;

static JOB_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,63}$").expect("job type pattern is valid")
});

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Allocated, not yet validated.
    Pending,
    /// Structurally valid, waiting for dispatch.
    Validated,
    /// Handed to a handler.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Validated) | (Pending, Cancelled) |
            // Dispatch failures land here before the job ever runs
            (Validated, Running) | (Validated, Failed) | (Validated, Cancelled) |
            (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the job is still in flight.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "validated" => Ok(Self::Validated),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Kind of job. An open set: any well-formed name is a job type, and it
/// becomes runnable once a handler is bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    /// Parse a job type name, rejecting malformed names.
    pub fn parse(name: &str) -> Result<Self, JobError> {
        if JOB_TYPE_PATTERN.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(JobError::Validation(format!(
                "job type '{name}' must be 1-64 characters of [A-Za-z0-9_.-] starting with a letter or digit"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification of a recorded job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The handler rejected the job.
    #[serde(rename = "ValidationError")]
    Validation,
    /// No handler is bound to the job type.
    #[serde(rename = "DispatchError")]
    Dispatch,
    /// The handler raised, panicked, or reported failure.
    #[serde(rename = "HandlerError")]
    Handler,
    /// Network failure, timeout or non-2xx from a remote service.
    #[serde(rename = "RemoteCallError")]
    RemoteCall,
    /// A remote service answered with a malformed body.
    #[serde(rename = "ProtocolError")]
    Protocol,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "ValidationError",
            Self::Dispatch => "DispatchError",
            Self::Handler => "HandlerError",
            Self::RemoteCall => "RemoteCallError",
            Self::Protocol => "ProtocolError",
        };
        f.write_str(s)
    }
}

/// Failure recorded on a job's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A status transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A single mutation applied to a job record by its store.
///
/// Keeping every mutation in one enum lets the store apply it under the
/// record's lock, so a snapshot never shows a half-applied change.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// Plain status change (validated, running, cancelled).
    Transition {
        to: JobStatus,
        reason: Option<String>,
    },
    /// Move to `completed` with the handler's result.
    Complete {
        result: Value,
        artifacts: Vec<Uuid>,
        warnings: Vec<String>,
    },
    /// Move to `failed` with the recorded cause.
    Fail(JobFailure),
}

impl JobUpdate {
    pub fn transition(to: JobStatus, reason: impl Into<String>) -> Self {
        Self::Transition {
            to,
            reason: Some(reason.into()),
        }
    }

    /// The status this update moves the job to.
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Transition { to, .. } => *to,
            Self::Complete { .. } => JobStatus::Completed,
            Self::Fail(_) => JobStatus::Failed,
        }
    }
}

/// A unit of work tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Interpreted only by the handler.
    pub payload: Map<String, Value>,
    /// Carried through unchanged.
    pub metadata: Map<String, Value>,
    pub status: JobStatus,
    /// Present only when `status = completed`.
    pub result: Option<Value>,
    /// Present only when `status = failed`.
    pub error: Option<JobFailure>,
    /// Artifacts registered from this job's output (weak references).
    pub artifacts: Vec<Uuid>,
    /// Non-fatal problems, e.g. artifact entries that could not be registered.
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

impl Job {
    /// Allocate a new job in `pending`.
    pub fn new(job_type: JobType, payload: Map<String, Value>, metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            payload,
            metadata,
            status: JobStatus::Pending,
            result: None,
            error: None,
            artifacts: Vec::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            transitions: Vec::new(),
        }
    }

    /// Apply an update, enforcing the state machine.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), JobError> {
        let target = update.target();
        if !self.status.can_transition_to(target) {
            return Err(JobError::InvalidState {
                id: self.id,
                state: self.status,
                action: format!("transition to {target}"),
            });
        }

        let reason = match update {
            JobUpdate::Transition { reason, .. } => reason,
            JobUpdate::Complete {
                result,
                artifacts,
                warnings,
            } => {
                self.result = Some(result);
                self.artifacts = artifacts;
                self.warnings.extend(warnings);
                None
            }
            JobUpdate::Fail(failure) => {
                let reason = Some(failure.to_string());
                self.error = Some(failure);
                reason
            }
        };

        // Clock skew must not make updated_at go backwards.
        let now = Utc::now().max(self.updated_at);
        self.transitions.push(StateTransition {
            from: self.status,
            to: target,
            timestamp: now,
            reason,
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = target;
        self.updated_at = now;
        match target {
            JobStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            _ => {}
        }

        Ok(())
    }
}
