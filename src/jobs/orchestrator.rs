//! Job orchestrator: submission, dispatch, status, and cancellation.
//!
//! Each accepted job gets its own task that resolves a dispatch target,
//! runs the job on the execution engine, and records the outcome. That
//! task is the only writer of the job's state apart from `cancel`, and the
//! store rejects any transition out of a terminal state, so a late outcome
//! after cancellation is simply discarded.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{RwLock, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifacts::registry::ArtifactRegistry;
use crate::config::OrchestratorConfig;
use crate::engine::{ExecutionEngine, Outcome, WorkerPool, panic_message};
use crate::error::{Error, JobError};
use crate::handlers::builtin;
use crate::handlers::registry::HandlerRegistry;
use crate::handlers::remote::RemoteClient;
use crate::jobs::model::{FailureKind, Job, JobFailure, JobStatus, JobType, JobUpdate};
use crate::jobs::store::{InMemoryJobStore, JobStore};

/// Default job event channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A request to run a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl JobSubmission {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Conjunctive filter for [`JobOrchestrator::list_jobs`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|status| job.status == status)
            && self
                .job_type
                .as_deref()
                .is_none_or(|job_type| job.job_type.as_str() == job_type)
    }
}

/// Emitted after every applied status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    fn of(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            at: job.updated_at,
        }
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSummary {
    pub total: usize,
    pub in_flight: usize,
    pub by_status: BTreeMap<String, usize>,
}

/// Tracked job task.
struct TrackedJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything a job task needs, cloned into each task.
#[derive(Clone)]
struct Driver {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    engine: Arc<ExecutionEngine>,
    events: broadcast::Sender<JobEvent>,
    running: Arc<RwLock<HashMap<Uuid, TrackedJob>>>,
}

impl Driver {
    /// Apply an update and announce it. A job that reached a terminal
    /// state in the meantime keeps that state.
    async fn apply(&self, job_id: Uuid, update: JobUpdate) -> Option<Job> {
        match self.store.apply(job_id, update).await {
            Ok(job) => {
                let _ = self.events.send(JobEvent::of(&job));
                Some(job)
            }
            Err(JobError::InvalidState { state, action, .. }) => {
                tracing::debug!(job_id = %job_id, state = %state, action = %action, "Discarded update for settled job");
                None
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to update job");
                None
            }
        }
    }

    /// Run a job's dispatch once `submit` releases it, then untrack it.
    ///
    /// A panic anywhere in dispatch fails the job instead of leaving it
    /// stuck in a non-terminal state.
    async fn drive(self, job_id: Uuid, cancel: CancellationToken, released: oneshot::Receiver<()>) {
        let _ = released.await;
        // Let the submitter observe the accepted job first.
        tokio::task::yield_now().await;

        if let Err(panic) = AssertUnwindSafe(self.dispatch(job_id, &cancel))
            .catch_unwind()
            .await
        {
            let message = panic_message(panic);
            tracing::error!(job_id = %job_id, error = %message, "Dispatch aborted");
            self.apply(
                job_id,
                JobUpdate::Fail(JobFailure::new(
                    FailureKind::Handler,
                    format!("dispatch aborted: {message}"),
                )),
            )
            .await;
        }
        self.running.write().await.remove(&job_id);
    }

    async fn dispatch(&self, job_id: Uuid, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            self.apply(job_id, JobUpdate::transition(JobStatus::Cancelled, "cancelled before dispatch"))
                .await;
            return;
        }

        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job vanished before dispatch");
                return;
            }
        };

        let target = match self.handlers.resolve(&job.job_type).await {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(job_id = %job_id, job_type = %job.job_type, error = %e, "Dispatch failed");
                self.apply(job_id, JobUpdate::Fail(JobFailure::new(FailureKind::Dispatch, e.to_string())))
                    .await;
                return;
            }
        };
        tracing::debug!(job_id = %job_id, job_type = %job.job_type, target = %target, "Resolved dispatch target");

        let Some(job) = self
            .apply(
                job_id,
                JobUpdate::transition(JobStatus::Running, format!("dispatched to {target}")),
            )
            .await
        else {
            return;
        };

        let update = match self.engine.run(&job, &target, cancel).await {
            Outcome::Completed {
                result,
                artifacts,
                warnings,
            } => JobUpdate::Complete {
                result,
                artifacts,
                warnings,
            },
            Outcome::Failed(failure) => JobUpdate::Fail(failure),
            Outcome::Cancelled => JobUpdate::transition(JobStatus::Cancelled, "execution interrupted"),
        };

        if let Some(job) = self.apply(job_id, update).await {
            match &job.error {
                Some(failure) => tracing::warn!(job_id = %job_id, error = %failure, "Job failed"),
                None => tracing::info!(
                    job_id = %job_id,
                    status = %job.status,
                    artifacts = job.artifacts.len(),
                    warnings = job.warnings.len(),
                    "Job finished"
                ),
            }
        }
    }
}

/// Coordinates job submission, dispatch, and lifecycle tracking.
pub struct JobOrchestrator {
    driver: Driver,
    artifacts: Arc<ArtifactRegistry>,
    /// Parent of every job's cancellation token.
    shutdown: CancellationToken,
}

impl JobOrchestrator {
    /// Create an orchestrator over explicit components.
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: Arc<HandlerRegistry>,
        engine: ExecutionEngine,
        event_capacity: usize,
    ) -> Self {
        let (events, _rx) = broadcast::channel(event_capacity.max(1));
        let artifacts = Arc::clone(engine.artifacts());
        Self {
            driver: Driver {
                store,
                handlers,
                engine: Arc::new(engine),
                events,
                running: Arc::new(RwLock::new(HashMap::new())),
            },
            artifacts,
            shutdown: CancellationToken::new(),
        }
    }

    /// In-memory orchestrator with no handlers bound.
    pub fn in_memory(remote_timeout: std::time::Duration, workers: usize) -> Self {
        let engine = ExecutionEngine::new(
            Arc::new(ArtifactRegistry::new()),
            RemoteClient::new(remote_timeout),
            WorkerPool::new(workers),
        );
        Self::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(HandlerRegistry::new()),
            engine,
            DEFAULT_EVENT_CAPACITY,
        )
    }

    /// Build an orchestrator from configuration, binding the built-in
    /// handlers and configured remote services.
    pub async fn from_config(config: &OrchestratorConfig) -> Result<Self, Error> {
        let engine = ExecutionEngine::new(
            Arc::new(ArtifactRegistry::new()),
            RemoteClient::new(config.remote_timeout),
            WorkerPool::new(config.max_local_workers),
        );
        let orchestrator = Self::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(HandlerRegistry::new()),
            engine,
            config.event_capacity,
        );

        if config.builtin_handlers {
            builtin::register_builtin(orchestrator.handlers()).await?;
        }
        for service in &config.services {
            orchestrator
                .handlers()
                .register_remote(&service.job_type, &service.url)
                .await?;
        }
        Ok(orchestrator)
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.driver.handlers
    }

    pub fn artifacts(&self) -> &Arc<ArtifactRegistry> {
        &self.artifacts
    }

    /// Subscribe to job status events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.driver.events.subscribe()
    }

    /// Validate and accept a job, returning its id without waiting for it
    /// to run. Routing failures surface later through the job's status.
    pub async fn submit(&self, submission: JobSubmission) -> Result<Uuid, JobError> {
        let job_type = JobType::parse(submission.job_type.trim())?;
        let payload = match submission.payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(JobError::Validation(format!(
                    "payload must be an object, got {}",
                    json_kind(&other)
                )));
            }
        };
        let metadata = match submission.metadata {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(JobError::Validation(format!(
                    "metadata must be an object, got {}",
                    json_kind(&other)
                )));
            }
        };
        if let Some(schema) = self.driver.handlers.schema_for(&job_type).await {
            schema.check(&payload).map_err(JobError::Validation)?;
        }

        let job = Job::new(job_type, payload, metadata);
        let job_id = job.id;
        let job_type = job.job_type.clone();
        self.driver.store.insert(job).await?;
        self.driver
            .apply(job_id, JobUpdate::transition(JobStatus::Validated, "payload accepted"))
            .await;
        tracing::info!(job_id = %job_id, job_type = %job_type, "Job submitted");

        // The task waits on `release` so dispatch is ordered behind the
        // bookkeeping here and never starts before the job is tracked.
        let cancel = self.shutdown.child_token();
        let (release, released) = oneshot::channel();
        let handle = tokio::spawn(self.driver.clone().drive(job_id, cancel.clone(), released));
        self.driver
            .running
            .write()
            .await
            .insert(job_id, TrackedJob { cancel, handle });
        let _ = release.send(());

        Ok(job_id)
    }

    /// Consistent snapshot of a job.
    pub async fn get_status(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.driver.store.get(job_id).await
    }

    /// Jobs matching `filter`, in submission order.
    ///
    /// The stream is lazy: records are fetched one at a time as it is
    /// polled. Call again to restart.
    pub fn list_jobs(&self, filter: JobFilter) -> impl Stream<Item = Job> + Send + '_ {
        let limit = filter.limit.unwrap_or(usize::MAX);
        let store = &self.driver.store;
        stream::once(store.ids())
            .flat_map(stream::iter)
            .filter_map(move |id| {
                let filter = filter.clone();
                async move {
                    store
                        .get(id)
                        .await
                        .ok()
                        .filter(|job| filter.matches(job))
                }
            })
            .take(limit)
    }

    /// Cancel a job that has not reached a terminal state.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, JobError> {
        let job = self
            .driver
            .store
            .apply(job_id, JobUpdate::transition(JobStatus::Cancelled, "cancelled by request"))
            .await
            .map_err(|e| match e {
                JobError::InvalidState { id, state, .. } => JobError::InvalidState {
                    id,
                    state,
                    action: "cancel".into(),
                },
                other => other,
            })?;
        let _ = self.driver.events.send(JobEvent::of(&job));

        if let Some(tracked) = self.driver.running.read().await.get(&job_id) {
            tracked.cancel.cancel();
        }
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(job)
    }

    /// Wait until a job reaches a terminal state.
    pub async fn wait(&self, job_id: Uuid) -> Result<Job, JobError> {
        // Subscribe before the first read so no transition is missed.
        let mut rx = self.subscribe();
        let job = self.get_status(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        loop {
            match rx.recv().await {
                Ok(event) if event.job_id == job_id && event.status.is_terminal() => {
                    return self.get_status(job_id).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(job_id = %job_id, missed, "Job waiter lagged, re-reading status");
                    let job = self.get_status(job_id).await?;
                    if job.status.is_terminal() {
                        return Ok(job);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return self.get_status(job_id).await,
            }
        }
    }

    /// Delete a terminal job record. Its artifacts are kept.
    pub async fn remove_job(&self, job_id: Uuid) -> Result<Job, JobError> {
        let job = self.get_status(job_id).await?;
        if !job.status.is_terminal() {
            return Err(JobError::InvalidState {
                id: job_id,
                state: job.status,
                action: "remove".into(),
            });
        }
        let removed = self.driver.store.remove(job_id).await?;
        tracing::info!(job_id = %job_id, artifacts = removed.artifacts.len(), "Removed job");
        Ok(removed)
    }

    /// Job counts by status.
    pub async fn summary(&self) -> JobSummary {
        let mut summary = JobSummary::default();
        let mut jobs = std::pin::pin!(self.list_jobs(JobFilter::default()));
        while let Some(job) = jobs.next().await {
            summary.total += 1;
            *summary
                .by_status
                .entry(job.status.as_str().to_string())
                .or_default() += 1;
        }
        summary.in_flight = self.running_count().await;
        summary
    }

    /// Number of jobs with a live task.
    pub async fn running_count(&self) -> usize {
        self.driver.running.read().await.len()
    }

    /// Cancel every in-flight job and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tracked: Vec<(Uuid, TrackedJob)> = self.driver.running.write().await.drain().collect();
        tracing::info!(in_flight = tracked.len(), "Shutting down orchestrator");
        for (job_id, job) in tracked {
            if let Err(e) = job.handle.await {
                tracing::warn!(job_id = %job_id, error = %e, "Job task ended abnormally");
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
