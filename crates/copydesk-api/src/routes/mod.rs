//! API routes.

pub mod activity;
pub mod clients;
pub mod health;
pub mod queues;
pub mod scheduler;
pub mod schedules;
pub mod work_items;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/scheduler", scheduler::router())
        .nest("/clients", clients::router())
        .nest("/schedules", schedules::router())
        .nest("/work-items", work_items::router())
        .nest("/queues", queues::router())
        .nest("/jobs", queues::jobs_router())
        .nest("/activity", activity::router())
}
