//! Activity log endpoint.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use copydesk_core::ClientId;
use copydesk_core::activity::ActivityRecord;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_activity))
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    client_id: Option<Uuid>,
    limit: Option<u32>,
}

async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let entries = state
        .activity
        .list_recent(query.client_id.map(ClientId::from), limit)
        .await?;
    Ok(Json(entries))
}
