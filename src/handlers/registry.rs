//! Job type to dispatch target bindings.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::DispatchError;
use crate::handlers::handler::{JobHandler, PayloadSchema};
use crate::handlers::remote::service_label;
use crate::jobs::model::JobType;

/// Where jobs of a type are sent.
#[derive(Clone)]
pub enum DispatchTarget {
    /// In-process handler.
    Local(Arc<dyn JobHandler>),
    /// Remote service base URL; jobs go to `{url}/execute`.
    Remote { url: Url },
}

impl DispatchTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Local(_) => TargetKind::Local,
            Self::Remote { .. } => TargetKind::Remote,
        }
    }

    /// Handler name or service URL.
    pub fn describe(&self) -> String {
        match self {
            Self::Local(handler) => handler.name().to_string(),
            Self::Remote { url } => service_label(url).to_string(),
        }
    }
}

impl fmt::Debug for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(handler) => f.debug_tuple("Local").field(&handler.name()).finish(),
            Self::Remote { url } => f.debug_struct("Remote").field("url", &url.as_str()).finish(),
        }
    }
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(handler) => write!(f, "local handler '{}'", handler.name()),
            Self::Remote { url } => write!(f, "remote service {url}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Local,
    Remote,
}

/// One row of [`HandlerRegistry::list_bindings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerBinding {
    pub job_type: String,
    pub kind: TargetKind,
    /// Handler name for local bindings, base URL for remote ones.
    pub target: String,
}

/// Registry of job type bindings. At most one binding per type; the last
/// registration wins.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: Mutex<HashMap<JobType, DispatchTarget>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a job type, returning the binding it replaced.
    pub async fn register(&self, job_type: JobType, target: DispatchTarget) -> Option<DispatchTarget> {
        let previous = self
            .bindings
            .lock()
            .await
            .insert(job_type.clone(), target.clone());
        match &previous {
            Some(old) => tracing::info!(
                job_type = %job_type,
                previous = %old,
                target = %target,
                "Replaced handler binding"
            ),
            None => tracing::info!(job_type = %job_type, target = %target, "Registered handler binding"),
        }
        previous
    }

    /// Bind every job type a local handler declares.
    pub async fn register_handler(&self, handler: Arc<dyn JobHandler>) -> Result<(), DispatchError> {
        let job_types = handler
            .job_types()
            .iter()
            .map(|name| parse_type(name))
            .collect::<Result<Vec<_>, _>>()?;
        if job_types.is_empty() {
            return Err(DispatchError::InvalidTarget {
                job_type: String::new(),
                reason: format!("handler '{}' declares no job types", handler.name()),
            });
        }
        for job_type in job_types {
            self.register(job_type, DispatchTarget::Local(Arc::clone(&handler)))
                .await;
        }
        Ok(())
    }

    /// Bind a job type to a remote service base URL.
    pub async fn register_remote(
        &self,
        job_type: &str,
        service_url: &str,
    ) -> Result<Option<DispatchTarget>, DispatchError> {
        let parsed_type = parse_type(job_type)?;
        let url = Url::parse(service_url).map_err(|e| DispatchError::InvalidTarget {
            job_type: job_type.to_string(),
            reason: format!("invalid service URL '{service_url}': {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DispatchError::InvalidTarget {
                job_type: job_type.to_string(),
                reason: format!("service URL must be http or https, got '{}'", url.scheme()),
            });
        }
        Ok(self.register(parsed_type, DispatchTarget::Remote { url }).await)
    }

    /// Look up the binding for a job type.
    pub async fn resolve(&self, job_type: &JobType) -> Result<DispatchTarget, DispatchError> {
        self.bindings
            .lock()
            .await
            .get(job_type)
            .cloned()
            .ok_or_else(|| DispatchError::UnregisteredType {
                job_type: job_type.to_string(),
            })
    }

    /// Remove a binding.
    pub async fn unregister(&self, job_type: &str) -> Result<DispatchTarget, DispatchError> {
        let unregistered = || DispatchError::UnregisteredType {
            job_type: job_type.to_string(),
        };
        let parsed = JobType::parse(job_type).map_err(|_| unregistered())?;
        let target = self
            .bindings
            .lock()
            .await
            .remove(&parsed)
            .ok_or_else(unregistered)?;
        tracing::info!(job_type = %job_type, target = %target, "Unregistered handler binding");
        Ok(target)
    }

    /// Current bindings sorted by job type.
    pub async fn list_bindings(&self) -> Vec<HandlerBinding> {
        let bindings = self.bindings.lock().await;
        let mut rows: Vec<HandlerBinding> = bindings
            .iter()
            .map(|(job_type, target)| HandlerBinding {
                job_type: job_type.to_string(),
                kind: target.kind(),
                target: target.describe(),
            })
            .collect();
        rows.sort_by(|a, b| a.job_type.cmp(&b.job_type));
        rows
    }

    /// Payload schema declared by the local handler bound to `job_type`.
    pub async fn schema_for(&self, job_type: &JobType) -> Option<PayloadSchema> {
        match self.bindings.lock().await.get(job_type) {
            Some(DispatchTarget::Local(handler)) => handler.payload_schema(),
            _ => None,
        }
    }

    /// Number of bound job types.
    pub async fn count(&self) -> usize {
        self.bindings.lock().await.len()
    }
}

fn parse_type(name: &str) -> Result<JobType, DispatchError> {
    JobType::parse(name).map_err(|e| DispatchError::InvalidTarget {
        job_type: name.to_string(),
        reason: e.to_string(),
    })
}
