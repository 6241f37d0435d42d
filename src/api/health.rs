//! Liveness, readiness, and service info.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use super::AppState;

const SERVICE: &str = "mcp-orchestrator";

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "ready": "/health/ready",
            "jobs": "/jobs",
            "artifacts": "/artifacts",
            "services": "/services",
        },
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": SERVICE}))
}

pub async fn ready(State(state): State<AppState>) -> Json<Value> {
    let orchestrator = &state.orchestrator;
    Json(json!({
        "status": "ready",
        "service": SERVICE,
        "jobs": orchestrator.summary().await,
        "artifacts": orchestrator.artifacts().count().await,
        "bindings": orchestrator.handlers().count().await,
    }))
}
