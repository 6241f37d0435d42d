//! Artifact routes.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::{AppError, AppResult};
use super::{AppState, DEFAULT_LIST_LIMIT, parse_id};
use crate::artifacts::model::{Artifact, ArtifactFilter, ArtifactRegistration, DependencyReport};

#[derive(Debug, Deserialize)]
pub struct DependencyQuery {
    #[serde(default)]
    transitive: bool,
}

fn owned(artifacts: Vec<Arc<Artifact>>) -> Vec<Artifact> {
    artifacts.into_iter().map(Arc::unwrap_or_clone).collect()
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<ArtifactRegistration>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(registration) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let artifact_id = state.orchestrator.artifacts().register(registration).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"artifact_id": artifact_id, "status": "registered"})),
    ))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Artifact>> {
    let artifact_id = parse_id(&id, "artifact")?;
    let artifact = state.orchestrator.artifacts().get(artifact_id).await?;
    Ok(Json(Arc::unwrap_or_clone(artifact)))
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ArtifactFilter>, QueryRejection>,
) -> AppResult<Json<Vec<Artifact>>> {
    let Query(mut filter) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    filter.limit.get_or_insert(DEFAULT_LIST_LIMIT);
    Ok(Json(owned(state.orchestrator.artifacts().list(&filter).await)))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let artifact_id = parse_id(&id, "artifact")?;
    state.orchestrator.artifacts().delete(artifact_id).await?;
    Ok(Json(json!({"artifact_id": artifact_id, "status": "deleted"})))
}

pub async fn dependencies(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<DependencyQuery>, QueryRejection>,
) -> AppResult<Json<DependencyReport>> {
    let artifact_id = parse_id(&id, "artifact")?;
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let report = state
        .orchestrator
        .artifacts()
        .get_dependencies(artifact_id, query.transitive)
        .await?;
    Ok(Json(report))
}

pub async fn dependents(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Artifact>>> {
    let artifact_id = parse_id(&id, "artifact")?;
    let dependents = state.orchestrator.artifacts().get_dependents(artifact_id).await?;
    Ok(Json(owned(dependents)))
}
