//! Per-client endpoints: schedules, manual runs and batch progress.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use copydesk_core::ClientId;
use copydesk_core::schedule::{NewSchedule, RecurrenceRule, Schedule};
use copydesk_core::work_item::BatchProgress;
use copydesk_scheduler::{AutomationRun, ManualRun, RunTrigger};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/{client_id}/schedules",
            get(list_schedules).post(create_schedule),
        )
        .route("/{client_id}/automation", post(start_automation))
        .route("/{client_id}/batches", get(batch_progress))
}

async fn list_schedules(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    let schedules = state.schedules.list(ClientId::from(client_id)).await?;
    Ok(Json(schedules))
}

#[derive(Debug, Deserialize)]
struct CreateScheduleRequest {
    name: String,
    #[serde(flatten)]
    rule: RecurrenceRule,
    jobs_per_run: u32,
}

async fn create_schedule(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    let schedule = state
        .schedules
        .create(NewSchedule {
            client_id: ClientId::from(client_id),
            name: req.name,
            rule: req.rule,
            jobs_per_run: req.jobs_per_run,
        })
        .await?;
    Ok(Json(schedule))
}

async fn start_automation(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    body: Option<Json<ManualRun>>,
) -> Result<Json<AutomationRun>, ApiError> {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    state.workers.ensure_running().await;
    let run = state
        .producer
        .start_automation(ClientId::from(client_id), RunTrigger::Manual(options))
        .await?;
    Ok(Json(run))
}

async fn batch_progress(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<Vec<BatchProgress>>, ApiError> {
    let progress = state
        .producer
        .batch_progress(ClientId::from(client_id))
        .await?;
    Ok(Json(progress))
}
