//! Local handler capability.
//!
//! A handler declares the job types it serves, may declare a payload schema
//! that is checked at submission, and exposes `validate` and `execute`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifacts::model::ArtifactRegistration;
use crate::engine::WorkerPool;
use crate::error::HandlerError;
use crate::jobs::model::Job;

/// What a handler receives for one job. Also the body of a remote
/// `POST /execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl From<&Job> for JobRequest {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.to_string(),
            payload: job.payload.clone(),
            metadata: job.metadata.clone(),
        }
    }
}

impl JobRequest {
    /// Get a required payload field.
    pub fn require(&self, field: &str) -> Result<&Value, HandlerError> {
        self.payload
            .get(field)
            .ok_or_else(|| HandlerError::MissingField(field.to_string()))
    }

    /// Get a payload string, falling back to `default` when absent.
    pub fn str_or<'a>(&'a self, field: &str, default: &'a str) -> Result<&'a str, HandlerError> {
        match self.payload.get(field) {
            None => Ok(default),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(HandlerError::InvalidField {
                field: field.to_string(),
                reason: "expected a string".into(),
            }),
        }
    }

    /// Get an optional unsigned integer payload field.
    pub fn u64_opt(&self, field: &str) -> Result<Option<u64>, HandlerError> {
        match self.payload.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| HandlerError::InvalidField {
                field: field.to_string(),
                reason: "expected a non-negative integer".into(),
            }),
        }
    }

    /// Get an optional numeric payload field.
    pub fn f64_opt(&self, field: &str) -> Result<Option<f64>, HandlerError> {
        match self.payload.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| HandlerError::InvalidField {
                field: field.to_string(),
                reason: "expected a number".into(),
            }),
        }
    }
}

/// Required top-level payload fields for a job type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSchema {
    pub required: Vec<String>,
}

impl PayloadSchema {
    pub fn required(fields: &[&str]) -> Self {
        Self {
            required: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Check a payload, naming every missing field.
    pub fn check(&self, payload: &Map<String, Value>) -> Result<(), String> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|field| !payload.contains_key(field.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required payload fields: {}", missing.join(", ")))
        }
    }
}

/// Execution context handed to a local handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub job_id: Uuid,
    cancel: CancellationToken,
    pool: WorkerPool,
}

impl HandlerContext {
    pub fn new(job_id: Uuid, cancel: CancellationToken, pool: WorkerPool) -> Self {
        Self {
            job_id,
            cancel,
            pool,
        }
    }

    /// Whether the job has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `duration`, returning early with `Cancelled` if the job is
    /// cancelled first.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), HandlerError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(HandlerError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run CPU-bound work on the bounded worker pool.
    pub async fn offload<F, R>(&self, work: F) -> Result<R, HandlerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.pool.run(work).await
    }
}

/// What a local handler returns on success.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    pub result: Value,
    pub artifacts: Vec<ArtifactRegistration>,
}

impl HandlerOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactRegistration) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// An in-process job handler.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handler name, also the default `service_id` of its artifacts.
    fn name(&self) -> &str;

    /// Job types this handler serves.
    fn job_types(&self) -> Vec<String>;

    /// Payload fields that must be present at submission.
    fn payload_schema(&self) -> Option<PayloadSchema> {
        None
    }

    /// Decide whether this handler accepts the job. Called right before
    /// `execute`; returning false fails the job with a validation error.
    async fn validate(&self, request: &JobRequest) -> bool {
        self.payload_schema()
            .is_none_or(|schema| schema.check(&request.payload).is_ok())
    }

    /// Execute the job.
    async fn execute(
        &self,
        request: JobRequest,
        ctx: HandlerContext,
    ) -> Result<HandlerOutput, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(payload: Value) -> JobRequest {
        JobRequest {
            job_id: Uuid::new_v4(),
            job_type: "backtest".into(),
            payload: payload.as_object().cloned().unwrap_or_default(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn schema_names_missing_fields() {
        let schema = PayloadSchema::required(&["strategy", "ticker"]);
        let payload = json!({"strategy": "momentum"});
        let err = schema.check(payload.as_object().unwrap()).unwrap_err();
        assert_eq!(err, "missing required payload fields: ticker");
        assert!(schema
            .check(json!({"strategy": "x", "ticker": "AAPL"}).as_object().unwrap())
            .is_ok());
    }

    #[test]
    fn request_wire_shape() {
        let req = request(json!({"ticker": "AAPL"}));
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["type"], "backtest");
        assert_eq!(wire["payload"]["ticker"], "AAPL");
        assert_eq!(wire["job_id"], json!(req.job_id));
        assert!(wire["metadata"].as_object().unwrap().is_empty());
    }

    #[test]
    fn payload_accessors() {
        let req = request(json!({"ticker": "AAPL", "epochs": 5, "capital": 1000.5, "bad": "x"}));
        assert!(req.require("ticker").is_ok());
        assert!(matches!(req.require("missing"), Err(HandlerError::MissingField(f)) if f == "missing"));
        assert_eq!(req.str_or("strategy", "momentum").unwrap(), "momentum");
        assert_eq!(req.u64_opt("epochs").unwrap(), Some(5));
        assert_eq!(req.f64_opt("capital").unwrap(), Some(1000.5));
        assert!(req.u64_opt("bad").is_err());
        assert!(req.str_or("epochs", "").is_err());
    }

    #[tokio::test]
    async fn context_sleep_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = HandlerContext::new(Uuid::new_v4(), token.clone(), WorkerPool::new(1));
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(
            ctx.sleep(std::time::Duration::from_secs(30)).await,
            Err(HandlerError::Cancelled)
        ));
        assert!(matches!(ctx.offload(|| 1).await, Err(HandlerError::Cancelled)));
    }
}
