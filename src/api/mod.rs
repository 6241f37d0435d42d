//! HTTP API over the orchestrator.

pub mod artifacts;
pub mod error;
pub mod health;
pub mod jobs;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::jobs::orchestrator::JobOrchestrator;
use error::AppError;

/// Page size when a listing request carries no `limit`.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
}

/// Build the API router.
pub fn router(orchestrator: Arc<JobOrchestrator>) -> Router {
    let state = AppState { orchestrator };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/jobs", get(jobs::list).post(jobs::submit))
        .route("/jobs/{id}", get(jobs::status).delete(jobs::cancel))
        .route("/artifacts", get(artifacts::list).post(artifacts::register))
        .route("/artifacts/{id}", get(artifacts::get).delete(artifacts::delete))
        .route("/artifacts/{id}/dependencies", get(artifacts::dependencies))
        .route("/artifacts/{id}/dependents", get(artifacts::dependents))
        .route("/services", get(services::list).post(services::register))
        .route("/services/{job_type}", delete(services::unregister))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until Ctrl-C, then cancel in-flight jobs.
pub async fn serve(orchestrator: Arc<JobOrchestrator>, addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "MCP orchestrator listening");

    axum::serve(listener, router(Arc::clone(&orchestrator)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    tracing::info!("MCP orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid {what} ID")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        router(Arc::new(JobOrchestrator::in_memory(Duration::from_secs(1), 1)))
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn invalid_ids_are_bad_requests() {
        for uri in ["/jobs/not-a-uuid", "/artifacts/123", "/artifacts/x/dependencies"] {
            let (status, body) = send(app(), Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["code"], "BAD_REQUEST");
        }
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let uri = format!("/jobs/{}", Uuid::new_v4());
        let (status, body) = send(app(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_bodies_are_json_errors() {
        let (status, body) = send(app(), Method::POST, "/jobs", Some(json!({"payload": {}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = send(app(), Method::POST, "/jobs", Some(json!({"type": "x", "payload": 5}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn bad_status_filter_is_rejected() {
        let (status, _) = send(app(), Method::GET, "/jobs?status=stuck", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let (status, body) = send(app(), Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "mcp-orchestrator");
        assert!(body["endpoints"]["jobs"].is_string());
    }
}
