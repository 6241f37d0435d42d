//! HTTP client for a running orchestrator, used by the CLI.

use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::api::services::ServiceRegistration;
use crate::artifacts::model::{Artifact, ArtifactFilter, DependencyReport};
use crate::handlers::registry::HandlerBinding;
use crate::jobs::model::Job;
use crate::jobs::orchestrator::{JobFilter, JobSubmission};

/// Thin wrapper over the orchestrator's REST API.
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base, path))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> anyhow::Result<T> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("could not reach orchestrator at {}", self.base))?;
        decode(response).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        self.send(self.request(method, path).json(body)).await
    }

    pub async fn submit(&self, submission: &JobSubmission) -> anyhow::Result<Uuid> {
        let reply: Value = self.send_json(Method::POST, "/jobs", submission).await?;
        let id = reply["job_id"]
            .as_str()
            .context("response is missing job_id")?;
        Ok(Uuid::parse_str(id)?)
    }

    pub async fn status(&self, job_id: Uuid) -> anyhow::Result<Job> {
        self.send(self.request(Method::GET, &format!("/jobs/{job_id}")))
            .await
    }

    /// Poll until the job is terminal.
    pub async fn wait(&self, job_id: Uuid, interval: Duration) -> anyhow::Result<Job> {
        loop {
            let job = self.status(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> anyhow::Result<Vec<Job>> {
        self.send(self.request(Method::GET, "/jobs").query(filter))
            .await
    }

    pub async fn cancel(&self, job_id: Uuid) -> anyhow::Result<Value> {
        self.send(self.request(Method::DELETE, &format!("/jobs/{job_id}")))
            .await
    }

    pub async fn register_service(&self, job_type: &str, service_url: &str) -> anyhow::Result<Value> {
        let body = ServiceRegistration {
            job_type: job_type.to_string(),
            service_url: service_url.to_string(),
        };
        self.send_json(Method::POST, "/services", &body).await
    }

    pub async fn list_services(&self) -> anyhow::Result<Vec<HandlerBinding>> {
        self.send(self.request(Method::GET, "/services")).await
    }

    pub async fn list_artifacts(&self, filter: &ArtifactFilter) -> anyhow::Result<Vec<Artifact>> {
        self.send(self.request(Method::GET, "/artifacts").query(filter))
            .await
    }

    pub async fn dependencies(&self, artifact_id: Uuid, transitive: bool) -> anyhow::Result<DependencyReport> {
        self.send(
            self.request(Method::GET, &format!("/artifacts/{artifact_id}/dependencies"))
                .query(&[("transitive", transitive)]),
        )
        .await
    }
}

/// Decode a success body or turn an error body into a readable error.
async fn decode<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
    let status = response.status();
    let body = response.text().await.context("failed to read response body")?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(body);
        bail!("{message} (HTTP {})", status.as_u16());
    }
    serde_json::from_str(&body).with_context(|| format!("unexpected response body: {body}"))
}
