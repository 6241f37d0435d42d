//! Remote service binding routes.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::AppState;
use super::error::{AppError, AppResult};
use crate::handlers::registry::HandlerBinding;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub job_type: String,
    pub service_url: String,
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<ServiceRegistration>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(service) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let previous = state
        .orchestrator
        .handlers()
        .register_remote(&service.job_type, &service.service_url)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "job_type": service.job_type,
            "service_url": service.service_url,
            "status": "registered",
            "replaced": previous.map(|target| target.describe()),
        })),
    ))
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<HandlerBinding>> {
    Json(state.orchestrator.handlers().list_bindings().await)
}

pub async fn unregister(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> AppResult<Json<Value>> {
    state.orchestrator.handlers().unregister(&job_type).await?;
    Ok(Json(json!({"job_type": job_type, "status": "unregistered"})))
}
