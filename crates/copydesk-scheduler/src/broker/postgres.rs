//! Job broker backed by PostgreSQL.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several workers can poll the same
//! queue without blocking each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copydesk_core::job::{JobId, JobPayload, QueueName};
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    BrokerConfig, EnqueueResult, FailOutcome, JobBroker, JobState, QueueCounts, QueuedJob, delay,
};
use crate::error::{BrokerError, BrokerResult};

/// A queued job row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    payload: serde_json::Value,
    priority: i32,
    status: String,
    attempts_made: i32,
    max_attempts: i32,
    run_at: DateTime<Utc>,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = BrokerError;

    fn try_from(row: JobRow) -> BrokerResult<Self> {
        let queue: QueueName = row
            .queue
            .parse()
            .map_err(|e: copydesk_core::Error| BrokerError::InvalidData(e.to_string()))?;
        Ok(QueuedJob {
            id: JobId::from(row.id),
            queue,
            payload: serde_json::from_value(row.payload)?,
            priority: row.priority,
            state: row.status.parse()?,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            run_at: row.run_at,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            error: row.error,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatusCount {
    status: String,
    count: i64,
}

/// PostgreSQL implementation of JobBroker.
pub struct PgJobBroker {
    pool: PgPool,
    config: BrokerConfig,
}

impl PgJobBroker {
    pub fn new(pool: PgPool, config: BrokerConfig) -> Self {
        Self { pool, config }
    }

    /// Lock an active job for update, distinguishing missing from wrong state.
    async fn lock_active(
        tx: &mut Transaction<'_, Postgres>,
        id: &JobId,
    ) -> BrokerResult<JobRow> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM queue_jobs WHERE id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| BrokerError::NotFound(id.to_string()))?;
        if row.status != JobState::Active.as_str() {
            return Err(BrokerError::InvalidState {
                id: id.to_string(),
                state: row.status,
                expected: JobState::Active.to_string(),
            });
        }
        Ok(row)
    }

    /// Keep only the newest `keep` jobs of `queue` in `state`.
    async fn purge(
        tx: &mut Transaction<'_, Postgres>,
        queue: &str,
        state: JobState,
        keep: u32,
    ) -> BrokerResult<()> {
        sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE id IN (
                SELECT id FROM queue_jobs
                WHERE queue = $1 AND status = $2
                ORDER BY finished_at DESC NULLS LAST, created_at DESC
                OFFSET $3
            )
            "#,
        )
        .bind(queue)
        .bind(state.as_str())
        .bind(i64::from(keep))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobBroker for PgJobBroker {
    async fn enqueue(&self, id: JobId, payload: JobPayload) -> BrokerResult<EnqueueResult> {
        let queue = payload.queue();
        let policy = self.config.policy(queue);
        let inserted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO queue_jobs (id, queue, payload, priority, status, max_attempts, run_at, created_at)
            VALUES ($1, $2, $3, $4, 'waiting', $5, NOW(), NOW())
            ON CONFLICT (id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id.as_str())
        .bind(queue.as_str())
        .bind(serde_json::to_value(&payload)?)
        .bind(policy.priority)
        .bind(policy.attempts as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(_) => EnqueueResult::Created(id),
            None => EnqueueResult::Duplicate(id),
        })
    }

    async fn claim(&self, queue: QueueName, worker_id: &str) -> BrokerResult<Option<QueuedJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE queue_jobs
            SET status = 'active', claimed_by = $2, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE queue = $1
                  AND status IN ('waiting', 'delayed')
                  AND run_at <= NOW()
                  AND NOT EXISTS (
                      SELECT 1 FROM queue_state s WHERE s.queue = $1 AND s.paused
                  )
                ORDER BY priority ASC, run_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(queue.as_str())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueuedJob::try_from).transpose()
    }

    async fn complete(&self, id: &JobId) -> BrokerResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = Self::lock_active(&mut tx, id).await?;
        sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'completed', finished_at = NOW(), error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
        Self::purge(
            &mut tx,
            &row.queue,
            JobState::Completed,
            self.config.keep_completed,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fail(&self, id: &JobId, error: &str) -> BrokerResult<FailOutcome> {
        let mut tx = self.pool.begin().await?;
        let row = Self::lock_active(&mut tx, id).await?;
        let attempts_made = row.attempts_made.max(0) as u32 + 1;

        let outcome = if attempts_made < row.max_attempts.max(0) as u32 {
            let queue: QueueName = row
                .queue
                .parse()
                .map_err(|e: copydesk_core::Error| BrokerError::InvalidData(e.to_string()))?;
            let backoff = self.config.policy(queue).backoff_delay(attempts_made);
            let (run_at,): (DateTime<Utc>,) = sqlx::query_as(
                r#"
                UPDATE queue_jobs
                SET status = 'delayed', attempts_made = $2, error = $3,
                    claimed_by = NULL, claimed_at = NULL,
                    run_at = NOW() + ($4 * INTERVAL '1 millisecond')
                WHERE id = $1
                RETURNING run_at
                "#,
            )
            .bind(id.as_str())
            .bind(attempts_made as i32)
            .bind(error)
            .bind(delay(backoff).num_milliseconds() as f64)
            .fetch_one(&mut *tx)
            .await?;
            FailOutcome::Retrying {
                attempts_made,
                run_at,
            }
        } else {
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET status = 'failed', attempts_made = $2, error = $3,
                    claimed_by = NULL, claimed_at = NULL, finished_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id.as_str())
            .bind(attempts_made as i32)
            .bind(error)
            .execute(&mut *tx)
            .await?;
            Self::purge(&mut tx, &row.queue, JobState::Failed, self.config.keep_failed).await?;
            FailOutcome::Exhausted { attempts_made }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get(&self, id: &JobId) -> BrokerResult<Option<QueuedJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM queue_jobs WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueuedJob::try_from).transpose()
    }

    async fn counts(&self, queue: QueueName) -> BrokerResult<QueueCounts> {
        let rows = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM queue_jobs WHERE queue = $1 GROUP BY status",
        )
        .bind(queue.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts {
            paused: self.is_paused(queue).await?,
            ..Default::default()
        };
        for row in rows {
            counts.add(row.status.parse()?, row.count.max(0) as u64);
        }
        Ok(counts)
    }

    async fn pause(&self, queue: QueueName) -> BrokerResult<()> {
        set_paused(&self.pool, queue, true).await
    }

    async fn resume(&self, queue: QueueName) -> BrokerResult<()> {
        set_paused(&self.pool, queue, false).await
    }

    async fn is_paused(&self, queue: QueueName) -> BrokerResult<bool> {
        let paused: Option<(bool,)> =
            sqlx::query_as("SELECT paused FROM queue_state WHERE queue = $1")
                .bind(queue.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(paused.is_some_and(|(paused,)| paused))
    }

    async fn drain(&self, queue: QueueName) -> BrokerResult<u64> {
        let result = sqlx::query(
            "DELETE FROM queue_jobs WHERE queue = $1 AND status IN ('waiting', 'delayed')",
        )
        .bind(queue.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_failed(&self, queue: QueueName, limit: u32) -> BrokerResult<Vec<QueuedJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM queue_jobs
            WHERE queue = $1 AND status = 'failed'
            ORDER BY finished_at DESC NULLS LAST, created_at DESC
            LIMIT $2
            "#,
        )
        .bind(queue.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueuedJob::try_from).collect()
    }

    async fn retry_failed(&self, id: &JobId) -> BrokerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'waiting', attempts_made = 0, run_at = NOW(),
                error = NULL, finished_at = NULL
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(id).await? {
            None => Err(BrokerError::NotFound(id.to_string())),
            Some(job) => Err(BrokerError::InvalidState {
                id: id.to_string(),
                state: job.state.to_string(),
                expected: JobState::Failed.to_string(),
            }),
        }
    }

    async fn remove(&self, id: &JobId) -> BrokerResult<bool> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE id = $1 AND status <> 'active'")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get(id).await? {
            None => Ok(false),
            Some(job) => Err(BrokerError::InvalidState {
                id: id.to_string(),
                state: job.state.to_string(),
                expected: "not active".to_string(),
            }),
        }
    }

    async fn stalled(&self, claimed_before: DateTime<Utc>) -> BrokerResult<Vec<QueuedJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM queue_jobs
            WHERE status = 'active' AND claimed_at < $1
            ORDER BY claimed_at ASC
            "#,
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueuedJob::try_from).collect()
    }
}

async fn set_paused(pool: &PgPool, queue: QueueName, paused: bool) -> BrokerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO queue_state (queue, paused, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (queue) DO UPDATE SET paused = EXCLUDED.paused, updated_at = NOW()
        "#,
    )
    .bind(queue.as_str())
    .bind(paused)
    .execute(pool)
    .await?;
    Ok(())
}
