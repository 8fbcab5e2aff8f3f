//! Work item endpoints.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use copydesk_core::WorkItemId;
use copydesk_core::work_item::WorkItem;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}/reset", post(reset_work_item))
}

/// Move a failed item back to pending so the next run picks it up.
async fn reset_work_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkItem>, ApiError> {
    let item = state.producer.reset_work_item(WorkItemId::from(id)).await?;
    Ok(Json(item))
}
