//! Queue inspection and control, and individual job actions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use copydesk_core::job::{JobId, QueueName};
use copydesk_scheduler::{QueueStatus, QueuedJob};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_FAILED_LIMIT: u32 = 50;
const MAX_FAILED_LIMIT: u32 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_queues))
        .route("/{queue}", get(get_queue))
        .route("/{queue}/pause", post(pause_queue))
        .route("/{queue}/resume", post(resume_queue))
        .route("/{queue}/drain", post(drain_queue))
        .route("/{queue}/failed", get(list_failed))
}

pub fn jobs_router() -> Router<AppState> {
    Router::new()
        .route("/{id}", delete(remove_job))
        .route("/{id}/retry", post(retry_job))
}

fn parse_queue(name: &str) -> Result<QueueName, ApiError> {
    Ok(name.parse::<QueueName>()?)
}

async fn list_queues(State(state): State<AppState>) -> Result<Json<Vec<QueueStatus>>, ApiError> {
    Ok(Json(state.monitor.all_queues().await?))
}

async fn get_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStatus>, ApiError> {
    let queue = parse_queue(&queue)?;
    Ok(Json(state.monitor.queue_status(queue).await?))
}

async fn pause_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStatus>, ApiError> {
    let queue = parse_queue(&queue)?;
    state.broker.pause(queue).await?;
    info!(queue = %queue, "queue paused");
    Ok(Json(state.monitor.queue_status(queue).await?))
}

async fn resume_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStatus>, ApiError> {
    let queue = parse_queue(&queue)?;
    state.broker.resume(queue).await?;
    info!(queue = %queue, "queue resumed");
    Ok(Json(state.monitor.queue_status(queue).await?))
}

async fn drain_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let queue = parse_queue(&queue)?;
    let removed = state.broker.drain(queue).await?;
    info!(queue = %queue, removed, "queue drained");
    Ok(Json(json!({ "queue": queue, "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct FailedQuery {
    limit: Option<u32>,
}

async fn list_failed(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<QueuedJob>>, ApiError> {
    let queue = parse_queue(&queue)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_LIMIT)
        .min(MAX_FAILED_LIMIT);
    Ok(Json(state.broker.list_failed(queue, limit).await?))
}

async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueuedJob>, ApiError> {
    let job = state.producer.retry_failed_job(&JobId::from(id)).await?;
    Ok(Json(job))
}

async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = JobId::from(id);
    if !state.broker.remove(&id).await? {
        return Err(ApiError::NotFound(format!("job {}", id)));
    }
    info!(job_id = %id, "job removed");
    Ok(StatusCode::NO_CONTENT)
}
