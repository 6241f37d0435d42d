//! HTTP client for remote handler services.
//!
//! A remote service receives `POST {base}/execute` with a [`JobRequest`]
//! body and answers with a [`RemoteResponse`].

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;
use crate::handlers::handler::JobRequest;

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Completed,
    Failed,
}

/// Response body of `POST /execute`. Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub status: RemoteStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    /// Raw artifact entries; each is parsed on its own so one bad entry
    /// does not reject the whole response.
    #[serde(default)]
    pub artifacts: Option<Vec<Value>>,
}

impl RemoteResponse {
    /// Human-readable failure message from the `error` field.
    pub fn error_message(&self) -> String {
        match &self.error {
            None | Some(Value::Null) => "remote handler reported failure".to_string(),
            Some(Value::String(message)) => message.clone(),
            Some(Value::Object(map)) => match map.get("message") {
                Some(Value::String(message)) => message.clone(),
                _ => Value::Object(map.clone()).to_string(),
            },
            Some(other) => other.to_string(),
        }
    }
}

/// Client for the remote execute contract.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Send one job to a remote service.
    pub async fn execute(&self, base: &Url, request: &JobRequest) -> Result<RemoteResponse, RemoteError> {
        let url = execute_url(base);
        tracing::debug!(job_id = %request.job_id, url = %url, "Calling remote handler");

        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                url,
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        parse_response(&url, &body)
    }

    fn transport_error(&self, url: &str, error: reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            RemoteError::Transport {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// Service URL without its trailing slash, as shown in bindings and artifacts.
pub(crate) fn service_label(base: &Url) -> &str {
    base.as_str().trim_end_matches('/')
}

fn execute_url(base: &Url) -> String {
    format!("{}/execute", service_label(base))
}

fn parse_response(url: &str, body: &[u8]) -> Result<RemoteResponse, RemoteError> {
    serde_json::from_slice(body).map_err(|e| RemoteError::Protocol {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
