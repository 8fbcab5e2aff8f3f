//! Schedule repository.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use copydesk_core::schedule::{NewSchedule, RecurrenceRule, Schedule, ScheduleState};
use copydesk_core::{ClientId, ScheduleId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A schedule row in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleRecord {
    pub id: uuid::Uuid,
    pub client_id: uuid::Uuid,
    pub name: String,
    pub frequency: String,
    pub interval_count: i32,
    pub start_time: NaiveTime,
    pub days_of_week: Vec<i16>,
    pub day_of_month: Option<i16>,
    pub jobs_per_run: i32,
    pub state: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduleRecord> for Schedule {
    type Error = DbError;

    fn try_from(record: ScheduleRecord) -> DbResult<Self> {
        let days_of_week = record
            .days_of_week
            .iter()
            .map(|day| {
                u8::try_from(*day)
                    .map_err(|_| DbError::InvalidData(format!("weekday out of range: {}", day)))
            })
            .collect::<DbResult<_>>()?;
        let day_of_month = record
            .day_of_month
            .map(|day| {
                u8::try_from(day)
                    .map_err(|_| DbError::InvalidData(format!("day of month out of range: {}", day)))
            })
            .transpose()?;

        Ok(Schedule {
            id: record.id.into(),
            client_id: record.client_id.into(),
            name: record.name,
            rule: RecurrenceRule {
                frequency: record.frequency.parse()?,
                interval: record.interval_count.max(1) as u32,
                start_time: record.start_time,
                days_of_week,
                day_of_month,
            },
            jobs_per_run: record.jobs_per_run.max(0) as u32,
            state: record.state.parse()?,
            last_run_at: record.last_run_at,
            next_run_at: record.next_run_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn weekdays(rule: &RecurrenceRule) -> Vec<i16> {
    rule.days_of_week.iter().map(|day| i16::from(*day)).collect()
}

#[async_trait]
pub trait ScheduleRepo: Send + Sync {
    async fn create(
        &self,
        schedule: &NewSchedule,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule>;

    async fn get(&self, id: ScheduleId) -> DbResult<Schedule>;

    /// All non-deleted schedules of a client, oldest first.
    async fn list_for_client(&self, client_id: ClientId) -> DbResult<Vec<Schedule>>;

    /// Every active schedule across all clients.
    async fn list_active(&self) -> DbResult<Vec<Schedule>>;

    /// Active schedules of one client, oldest first.
    async fn list_active_for_client(&self, client_id: ClientId) -> DbResult<Vec<Schedule>>;

    /// Replace the policy fields of a schedule.
    async fn save_policy(
        &self,
        id: ScheduleId,
        name: &str,
        rule: &RecurrenceRule,
        jobs_per_run: u32,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule>;

    async fn set_state(
        &self,
        id: ScheduleId,
        state: ScheduleState,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule>;

    async fn update_next_run(&self, id: ScheduleId, next_run_at: DateTime<Utc>) -> DbResult<()>;

    async fn update_last_run(&self, id: ScheduleId, last_run_at: DateTime<Utc>) -> DbResult<()>;
}

/// PostgreSQL implementation of ScheduleRepo.
pub struct PgScheduleRepo {
    pool: PgPool,
}

impl PgScheduleRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepo for PgScheduleRepo {
    async fn create(
        &self,
        schedule: &NewSchedule,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            r#"
            INSERT INTO schedules (
                id, client_id, name, frequency, interval_count, start_time,
                days_of_week, day_of_month, jobs_per_run, state, next_run_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active', $10, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(schedule.client_id.as_uuid())
        .bind(&schedule.name)
        .bind(schedule.rule.frequency.as_str())
        .bind(schedule.rule.interval as i32)
        .bind(schedule.rule.start_time)
        .bind(weekdays(&schedule.rule))
        .bind(schedule.rule.day_of_month.map(i16::from))
        .bind(schedule.jobs_per_run as i32)
        .bind(next_run_at)
        .fetch_one(&self.pool)
        .await?;
        Schedule::try_from(record)
    }

    async fn get(&self, id: ScheduleId) -> DbResult<Schedule> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            "SELECT * FROM schedules WHERE id = $1 AND state <> 'deleted'",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        Schedule::try_from(record)
    }

    async fn list_for_client(&self, client_id: ClientId) -> DbResult<Vec<Schedule>> {
        let records = sqlx::query_as::<_, ScheduleRecord>(
            r#"
            SELECT * FROM schedules
            WHERE client_id = $1 AND state <> 'deleted'
            ORDER BY created_at ASC
            "#,
        )
        .bind(client_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(Schedule::try_from).collect()
    }

    async fn list_active(&self) -> DbResult<Vec<Schedule>> {
        let records = sqlx::query_as::<_, ScheduleRecord>(
            "SELECT * FROM schedules WHERE state = 'active' ORDER BY next_run_at ASC NULLS LAST",
        )
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(Schedule::try_from).collect()
    }

    async fn list_active_for_client(&self, client_id: ClientId) -> DbResult<Vec<Schedule>> {
        let records = sqlx::query_as::<_, ScheduleRecord>(
            r#"
            SELECT * FROM schedules
            WHERE client_id = $1 AND state = 'active'
            ORDER BY created_at ASC
            "#,
        )
        .bind(client_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(Schedule::try_from).collect()
    }

    async fn save_policy(
        &self,
        id: ScheduleId,
        name: &str,
        rule: &RecurrenceRule,
        jobs_per_run: u32,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            r#"
            UPDATE schedules
            SET name = $2, frequency = $3, interval_count = $4, start_time = $5,
                days_of_week = $6, day_of_month = $7, jobs_per_run = $8,
                next_run_at = $9, updated_at = NOW()
            WHERE id = $1 AND state <> 'deleted'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(name)
        .bind(rule.frequency.as_str())
        .bind(rule.interval as i32)
        .bind(rule.start_time)
        .bind(weekdays(rule))
        .bind(rule.day_of_month.map(i16::from))
        .bind(jobs_per_run as i32)
        .bind(next_run_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        Schedule::try_from(record)
    }

    async fn set_state(
        &self,
        id: ScheduleId,
        state: ScheduleState,
        next_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<Schedule> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            r#"
            UPDATE schedules
            SET state = $2, next_run_at = $3, updated_at = NOW()
            WHERE id = $1 AND state <> 'deleted'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(state.as_str())
        .bind(next_run_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        Schedule::try_from(record)
    }

    async fn update_next_run(&self, id: ScheduleId, next_run_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE schedules SET next_run_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(next_run_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_last_run(&self, id: ScheduleId, last_run_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE schedules SET last_run_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(last_run_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
