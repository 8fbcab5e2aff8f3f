//! Work item repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copydesk_core::work_item::{AutomationStatus, BatchProgress, WorkItem};
use copydesk_core::{BatchId, ClientId, WorkItemId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::{DbError, DbResult};

/// A work item row in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkItemRecord {
    pub id: uuid::Uuid,
    pub client_id: uuid::Uuid,
    pub batch_id: uuid::Uuid,
    pub payload: serde_json::Value,
    pub automation_status: String,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WorkItemRecord> for WorkItem {
    type Error = DbError;

    fn try_from(record: WorkItemRecord) -> DbResult<Self> {
        let payload = match record.payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(DbError::InvalidData(format!(
                    "work item {} payload is not an object: {}",
                    record.id, other
                )));
            }
        };
        Ok(WorkItem {
            id: record.id.into(),
            client_id: record.client_id.into(),
            batch_id: record.batch_id.into(),
            payload,
            status: record.automation_status.parse()?,
            processing_started_at: record.processing_started_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Reject status moves the pipeline never makes.
pub(crate) fn check_transition(from: AutomationStatus, to: AutomationStatus) -> DbResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(DbError::InvalidData(format!(
            "work item cannot move from {} to {}",
            from, to
        )))
    }
}

#[async_trait]
pub trait WorkItemRepo: Send + Sync {
    /// Insert a batch of uploaded rows as pending work items.
    async fn insert_batch(
        &self,
        client_id: ClientId,
        batch_id: BatchId,
        payloads: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> DbResult<Vec<WorkItem>>;

    async fn get(&self, id: WorkItemId) -> DbResult<WorkItem>;

    /// Items of one client in `status`, oldest first.
    async fn list_by_status(
        &self,
        client_id: ClientId,
        status: AutomationStatus,
    ) -> DbResult<Vec<WorkItem>>;

    /// Move an item from `from` to `to` in a single conditional update.
    ///
    /// Returns `false` when the item was not in `from` (for example because a
    /// concurrent producer claimed it first). Entering `processing` stamps
    /// `processing_started_at`.
    async fn transition(
        &self,
        id: WorkItemId,
        from: AutomationStatus,
        to: AutomationStatus,
    ) -> DbResult<bool>;

    /// Operator reset of a failed item back to pending.
    async fn reset_failed(&self, id: WorkItemId) -> DbResult<bool>;

    /// Operator retry of a failed item: `failed → processing` in one
    /// conditional update, so its failed job can run again.
    async fn requeue_failed(&self, id: WorkItemId) -> DbResult<bool>;

    /// Status counts per batch for a client.
    async fn batch_progress(&self, client_id: ClientId) -> DbResult<Vec<BatchProgress>>;
}

/// PostgreSQL implementation of WorkItemRepo.
pub struct PgWorkItemRepo {
    pool: PgPool,
}

impl PgWorkItemRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BatchCountRow {
    batch_id: uuid::Uuid,
    automation_status: String,
    count: i64,
}

#[async_trait]
impl WorkItemRepo for PgWorkItemRepo {
    async fn insert_batch(
        &self,
        client_id: ClientId,
        batch_id: BatchId,
        payloads: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> DbResult<Vec<WorkItem>> {
        let mut tx = self.pool.begin().await?;
        let mut items = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let record = sqlx::query_as::<_, WorkItemRecord>(
                r#"
                INSERT INTO work_items (id, client_id, batch_id, payload, automation_status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, 'pending', NOW(), NOW())
                RETURNING *
                "#,
            )
            .bind(uuid::Uuid::now_v7())
            .bind(client_id.as_uuid())
            .bind(batch_id.as_uuid())
            .bind(serde_json::Value::Object(payload))
            .fetch_one(&mut *tx)
            .await?;
            items.push(WorkItem::try_from(record)?);
        }
        tx.commit().await?;
        Ok(items)
    }

    async fn get(&self, id: WorkItemId) -> DbResult<WorkItem> {
        let record = sqlx::query_as::<_, WorkItemRecord>("SELECT * FROM work_items WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("work item {}", id)))?;
        WorkItem::try_from(record)
    }

    async fn list_by_status(
        &self,
        client_id: ClientId,
        status: AutomationStatus,
    ) -> DbResult<Vec<WorkItem>> {
        let records = sqlx::query_as::<_, WorkItemRecord>(
            r#"
            SELECT * FROM work_items
            WHERE client_id = $1 AND automation_status = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(client_id.as_uuid())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(WorkItem::try_from).collect()
    }

    async fn transition(
        &self,
        id: WorkItemId,
        from: AutomationStatus,
        to: AutomationStatus,
    ) -> DbResult<bool> {
        check_transition(from, to)?;
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET automation_status = $3,
                processing_started_at = CASE WHEN $3 = 'processing' THEN NOW() ELSE processing_started_at END,
                updated_at = NOW()
            WHERE id = $1 AND automation_status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_failed(&self, id: WorkItemId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET automation_status = 'pending', processing_started_at = NULL, updated_at = NOW()
            WHERE id = $1 AND automation_status = 'failed'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn requeue_failed(&self, id: WorkItemId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET automation_status = 'processing', processing_started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND automation_status = 'failed'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn batch_progress(&self, client_id: ClientId) -> DbResult<Vec<BatchProgress>> {
        let rows = sqlx::query_as::<_, BatchCountRow>(
            r#"
            SELECT batch_id, automation_status, COUNT(*) AS count
            FROM work_items
            WHERE client_id = $1
            GROUP BY batch_id, automation_status
            ORDER BY batch_id
            "#,
        )
        .bind(client_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut order = Vec::new();
        let mut by_batch: HashMap<BatchId, BatchProgress> = HashMap::new();
        for row in rows {
            let batch_id = BatchId::from(row.batch_id);
            let status: AutomationStatus = row.automation_status.parse()?;
            by_batch
                .entry(batch_id)
                .or_insert_with(|| {
                    order.push(batch_id);
                    BatchProgress::new(batch_id)
                })
                .add(status, row.count.max(0) as u64);
        }
        Ok(order
            .into_iter()
            .filter_map(|batch_id| by_batch.remove(&batch_id))
            .collect())
    }
}
