//! Execution engine: runs one job against its dispatch target.

use std::any::Any;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifacts::model::ArtifactRegistration;
use crate::artifacts::registry::ArtifactRegistry;
use crate::error::HandlerError;
use crate::handlers::handler::{HandlerContext, JobHandler, JobRequest};
use crate::handlers::registry::DispatchTarget;
use crate::handlers::remote::{RemoteClient, RemoteStatus, service_label};
use crate::jobs::model::{FailureKind, Job, JobFailure};

/// Bounded pool for CPU-bound handler work.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently busy.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` on a blocking thread once a worker slot is free.
    pub async fn run<F, R>(&self, work: F) -> Result<R, HandlerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HandlerError::Worker("worker pool closed".into()))?;
        // The permit moves into the closure so the slot stays taken until
        // the work finishes, even if the caller stops waiting.
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| HandlerError::Worker(join_error_message(e)))
    }
}

/// Result of running a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        result: Value,
        /// Ids of artifacts registered from the handler's output.
        artifacts: Vec<Uuid>,
        /// Artifact entries that could not be registered.
        warnings: Vec<String>,
    },
    Failed(JobFailure),
    /// The job's cancellation token fired; any late handler result is dropped.
    Cancelled,
}

impl From<JobFailure> for Outcome {
    fn from(failure: JobFailure) -> Self {
        Self::Failed(failure)
    }
}

/// Handler output before artifact bookkeeping.
struct Produced {
    result: Value,
    artifacts: Vec<Result<ArtifactRegistration, String>>,
    service_id: String,
}

/// Runs jobs on local handlers or remote services and records their
/// artifacts.
pub struct ExecutionEngine {
    artifacts: Arc<ArtifactRegistry>,
    remote: RemoteClient,
    pool: WorkerPool,
}

impl ExecutionEngine {
    pub fn new(artifacts: Arc<ArtifactRegistry>, remote: RemoteClient, pool: WorkerPool) -> Self {
        Self {
            artifacts,
            remote,
            pool,
        }
    }

    pub fn artifacts(&self) -> &Arc<ArtifactRegistry> {
        &self.artifacts
    }

    /// Run a job to an outcome. Never panics on handler failure.
    pub async fn run(&self, job: &Job, target: &DispatchTarget, cancel: &CancellationToken) -> Outcome {
        let request = JobRequest::from(job);
        let produced = match target {
            DispatchTarget::Local(handler) => {
                self.run_local(Arc::clone(handler), request, cancel).await
            }
            DispatchTarget::Remote { url } => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Outcome::Cancelled),
                    response = self.remote.execute(url, &request) => match response {
                        Ok(response) => match response.status {
                            RemoteStatus::Completed => Ok(Produced {
                                result: response
                                    .result
                                    .filter(|v| !v.is_null())
                                    .unwrap_or_else(|| Value::Object(Map::new())),
                                artifacts: response
                                    .artifacts
                                    .unwrap_or_default()
                                    .into_iter()
                                    .map(|entry| {
                                        serde_json::from_value::<ArtifactRegistration>(entry)
                                            .map_err(|e| e.to_string())
                                    })
                                    .collect(),
                                service_id: service_label(url).to_string(),
                            }),
                            RemoteStatus::Failed => Err(JobFailure::new(
                                FailureKind::Handler,
                                response.error_message(),
                            )
                            .into()),
                        },
                        Err(e) => {
                            tracing::warn!(job_id = %job.id, url = %url, error = %e, "Remote call failed");
                            Err(JobFailure::new(e.kind(), e.to_string()).into())
                        }
                    },
                }
            }
        };

        let produced = match produced {
            Ok(produced) => produced,
            Err(outcome) => return outcome,
        };
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let mut artifact_ids = Vec::new();
        let mut warnings = Vec::new();
        for (index, entry) in produced.artifacts.into_iter().enumerate() {
            let registered = match entry {
                Ok(mut registration) => {
                    registration.job_id = Some(job.id);
                    if registration.service_id.is_none() {
                        registration.service_id = Some(produced.service_id.clone());
                    }
                    self.artifacts.register(registration).await.map_err(|e| e.to_string())
                }
                Err(e) => Err(e),
            };
            match registered {
                Ok(id) => artifact_ids.push(id),
                Err(e) => {
                    tracing::warn!(job_id = %job.id, index, error = %e, "Skipped artifact");
                    warnings.push(format!("artifact {index} not registered: {e}"));
                }
            }
        }

        Outcome::Completed {
            result: produced.result,
            artifacts: artifact_ids,
            warnings,
        }
    }

    async fn run_local(
        &self,
        handler: Arc<dyn JobHandler>,
        request: JobRequest,
        cancel: &CancellationToken,
    ) -> Result<Produced, Outcome> {
        let job_id = request.job_id;
        let name = handler.name().to_string();

        // Validation runs inside the task too, so a panic there is caught
        // like one in `execute`.
        let ctx = HandlerContext::new(job_id, cancel.clone(), self.pool.clone());
        let task = tokio::spawn(async move {
            if !handler.validate(&request).await {
                return None;
            }
            Some(handler.execute(request, ctx).await)
        });

        tokio::select! {
            biased;
            // The handler task is left to finish on its own; its result is dropped.
            _ = cancel.cancelled() => Err(Outcome::Cancelled),
            joined = task => match joined {
                Ok(None) => Err(JobFailure::new(
                    FailureKind::Validation,
                    format!("handler '{name}' rejected the job payload"),
                )
                .into()),
                Ok(Some(Ok(output))) => Ok(Produced {
                    result: output.result,
                    artifacts: output.artifacts.into_iter().map(Ok).collect(),
                    service_id: name,
                }),
                Ok(Some(Err(HandlerError::Cancelled))) if cancel.is_cancelled() => Err(Outcome::Cancelled),
                Ok(Some(Err(e))) => {
                    tracing::warn!(job_id = %job_id, handler = %name, error = %e, "Handler failed");
                    Err(JobFailure::new(FailureKind::Handler, e.to_string()).into())
                }
                Err(e) => {
                    let message = join_error_message(e);
                    tracing::error!(job_id = %job_id, handler = %name, error = %message, "Handler task aborted");
                    Err(JobFailure::new(FailureKind::Handler, message).into())
                }
            },
        }
    }
}

fn join_error_message(error: tokio::task::JoinError) -> String {
    if error.is_panic() {
        format!("handler panicked: {}", panic_message(error.into_panic()))
    } else {
        error.to_string()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
