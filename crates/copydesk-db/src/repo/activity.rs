//! Activity log repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copydesk_core::ClientId;
use copydesk_core::activity::{ActivityRecord, ActivityRefs, NewActivity};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// An activity row in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityRow {
    pub id: uuid::Uuid,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub client_id: Option<uuid::Uuid>,
    pub work_item_id: Option<uuid::Uuid>,
    pub batch_id: Option<uuid::Uuid>,
    pub schedule_id: Option<uuid::Uuid>,
    pub job_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityRecord {
    type Error = DbError;

    fn try_from(row: ActivityRow) -> DbResult<Self> {
        Ok(ActivityRecord {
            id: row.id.into(),
            kind: row.kind.parse()?,
            title: row.title,
            description: row.description,
            refs: ActivityRefs {
                client_id: row.client_id.map(Into::into),
                work_item_id: row.work_item_id.map(Into::into),
                batch_id: row.batch_id.map(Into::into),
                schedule_id: row.schedule_id.map(Into::into),
                job_id: row.job_id,
            },
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// Append-only activity log.
#[async_trait]
pub trait ActivityRepo: Send + Sync {
    async fn record(&self, activity: NewActivity) -> DbResult<ActivityRecord>;

    /// Most recent entries first, optionally restricted to one client.
    async fn list_recent(
        &self,
        client_id: Option<ClientId>,
        limit: u32,
    ) -> DbResult<Vec<ActivityRecord>>;
}

/// PostgreSQL implementation of ActivityRepo.
pub struct PgActivityRepo {
    pool: PgPool,
}

impl PgActivityRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityRepo for PgActivityRepo {
    async fn record(&self, activity: NewActivity) -> DbResult<ActivityRecord> {
        let refs = &activity.refs;
        let row = sqlx::query_as::<_, ActivityRow>(
            r#"
            INSERT INTO activity_log (
                id, kind, title, description, client_id, work_item_id,
                batch_id, schedule_id, job_id, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(activity.kind.to_string())
        .bind(&activity.title)
        .bind(&activity.description)
        .bind(refs.client_id.map(|id| *id.as_uuid()))
        .bind(refs.work_item_id.map(|id| *id.as_uuid()))
        .bind(refs.batch_id.map(|id| *id.as_uuid()))
        .bind(refs.schedule_id.map(|id| *id.as_uuid()))
        .bind(refs.job_id.as_deref())
        .bind(&activity.metadata)
        .fetch_one(&self.pool)
        .await?;
        ActivityRecord::try_from(row)
    }

    async fn list_recent(
        &self,
        client_id: Option<ClientId>,
        limit: u32,
    ) -> DbResult<Vec<ActivityRecord>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT * FROM activity_log
            WHERE ($1::uuid IS NULL OR client_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(client_id.map(|id| *id.as_uuid()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ActivityRecord::try_from).collect()
    }
}
