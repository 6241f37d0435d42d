//! Job routes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::{AppError, AppResult};
use super::{AppState, DEFAULT_LIST_LIMIT, parse_id};
use crate::jobs::model::{Job, JobStatus};
use crate::jobs::orchestrator::{JobFilter, JobSubmission};

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    status: Option<String>,
    #[serde(rename = "type")]
    job_type: Option<String>,
    limit: Option<usize>,
}

pub async fn submit(
    State(state): State<AppState>,
    body: Result<Json<JobSubmission>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(submission) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let job_id = state.orchestrator.submit(submission).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"job_id": job_id, "status": "submitted"})),
    ))
}

pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Job>> {
    let job_id = parse_id(&id, "job")?;
    Ok(Json(state.orchestrator.get_status(job_id).await?))
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<JobQuery>, QueryRejection>,
) -> AppResult<Json<Vec<Job>>> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let filter = JobFilter {
        status,
        job_type: query.job_type,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };
    let jobs: Vec<Job> = state.orchestrator.list_jobs(filter).collect().await;
    Ok(Json(jobs))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let job_id = parse_id(&id, "job")?;
    state.orchestrator.cancel(job_id).await?;
    Ok(Json(json!({"job_id": job_id, "status": "cancelled"})))
}
