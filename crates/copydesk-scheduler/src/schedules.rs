//! Operator management of schedules.
//!
//! Every change to a schedule's rule or state recomputes `next_run_at` from
//! the current time, so a resumed schedule never fires on a stale due time.

use chrono_tz::Tz;
use copydesk_core::schedule::{NewSchedule, Schedule, ScheduleState, ScheduleUpdate};
use copydesk_core::{ClientId, Clock, Error, ScheduleId};
use copydesk_db::ScheduleRepo;
use std::sync::Arc;
use tracing::info;

use crate::error::SchedulerResult;

pub struct ScheduleService {
    schedules: Arc<dyn ScheduleRepo>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl ScheduleService {
    pub fn new(schedules: Arc<dyn ScheduleRepo>, clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        Self {
            schedules,
            clock,
            timezone,
        }
    }

    pub async fn create(&self, schedule: NewSchedule) -> SchedulerResult<Schedule> {
        schedule.validate()?;
        let next_run_at = schedule
            .rule
            .next_run_after(self.clock.now(), self.timezone);
        let created = self.schedules.create(&schedule, Some(next_run_at)).await?;
        info!(
            schedule_id = %created.id,
            client_id = %created.client_id,
            frequency = %created.rule.frequency.as_str(),
            next_run_at = %next_run_at,
            "schedule created"
        );
        Ok(created)
    }

    pub async fn get(&self, id: ScheduleId) -> SchedulerResult<Schedule> {
        Ok(self.schedules.get(id).await?)
    }

    pub async fn list(&self, client_id: ClientId) -> SchedulerResult<Vec<Schedule>> {
        Ok(self.schedules.list_for_client(client_id).await?)
    }

    /// Apply an edit. Active schedules get a fresh `next_run_at`; paused ones
    /// get theirs on resume.
    pub async fn update(&self, id: ScheduleId, update: ScheduleUpdate) -> SchedulerResult<Schedule> {
        update.validate()?;
        let current = self.schedules.get(id).await?;

        let name = update.name.unwrap_or(current.name);
        let rule = update.rule.unwrap_or(current.rule);
        let jobs_per_run = update.jobs_per_run.unwrap_or(current.jobs_per_run);
        let next_run_at = match current.state {
            ScheduleState::Active => Some(rule.next_run_after(self.clock.now(), self.timezone)),
            _ => None,
        };

        let updated = self
            .schedules
            .save_policy(id, &name, &rule, jobs_per_run, next_run_at)
            .await?;
        info!(schedule_id = %id, "schedule updated");
        Ok(updated)
    }

    pub async fn pause(&self, id: ScheduleId) -> SchedulerResult<Schedule> {
        let current = self.schedules.get(id).await?;
        if current.state != ScheduleState::Active {
            return Err(Error::Conflict(format!(
                "schedule {} is {}, only active schedules can be paused",
                id,
                current.state.as_str()
            ))
            .into());
        }
        let paused = self
            .schedules
            .set_state(id, ScheduleState::Paused, None)
            .await?;
        info!(schedule_id = %id, "schedule paused");
        Ok(paused)
    }

    /// Resume a paused schedule, computing its next run from now.
    pub async fn resume(&self, id: ScheduleId) -> SchedulerResult<Schedule> {
        let current = self.schedules.get(id).await?;
        if current.state != ScheduleState::Paused {
            return Err(Error::Conflict(format!(
                "schedule {} is {}, only paused schedules can be resumed",
                id,
                current.state.as_str()
            ))
            .into());
        }
        let next_run_at = current
            .rule
            .next_run_after(self.clock.now(), self.timezone);
        let resumed = self
            .schedules
            .set_state(id, ScheduleState::Active, Some(next_run_at))
            .await?;
        info!(schedule_id = %id, next_run_at = %next_run_at, "schedule resumed");
        Ok(resumed)
    }

    /// Soft delete. Deleted schedules are never evaluated again.
    pub async fn delete(&self, id: ScheduleId) -> SchedulerResult<()> {
        self.schedules
            .set_state(id, ScheduleState::Deleted, None)
            .await?;
        info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }
}
