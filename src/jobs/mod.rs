//! Jobs: lifecycle model, storage, and orchestration.

pub mod model;
pub mod orchestrator;
pub mod store;

pub use model::{FailureKind, Job, JobFailure, JobStatus, JobType, JobUpdate, StateTransition};
pub use orchestrator::{JobEvent, JobFilter, JobOrchestrator, JobSubmission, JobSummary};
pub use store::{InMemoryJobStore, JobStore};
