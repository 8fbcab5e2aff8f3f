//! Scheduler control endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use copydesk_scheduler::SchedulerStatus;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
}

async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

async fn start(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.workers.ensure_running().await;
    state.scheduler.start().await;
    Json(state.scheduler.status().await)
}

async fn stop(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.scheduler.stop().await;
    Json(state.scheduler.status().await)
}
