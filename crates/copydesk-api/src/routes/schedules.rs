//! Schedule endpoints addressed by schedule id.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use copydesk_core::ScheduleId;
use copydesk_core::schedule::{Schedule, ScheduleUpdate};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{id}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/{id}/pause", post(pause_schedule))
        .route("/{id}/resume", post(resume_schedule))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(state.schedules.get(ScheduleId::from(id)).await?))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ScheduleUpdate>,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(
        state.schedules.update(ScheduleId::from(id), update).await?,
    ))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.schedules.delete(ScheduleId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(state.schedules.pause(ScheduleId::from(id)).await?))
}

async fn resume_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(state.schedules.resume(ScheduleId::from(id)).await?))
}
