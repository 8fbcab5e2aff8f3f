//! Scheduler: a fixed-interval tick that runs every due schedule.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use copydesk_core::activity::{ActivityKind, ActivityRefs, NewActivity};
use copydesk_core::schedule::Schedule;
use copydesk_core::{ClientId, Clock, Error, ScheduleId};
use copydesk_db::{ActivityRepo, ScheduleRepo};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::SchedulerResult;
use crate::producer::{Producer, RunTrigger};
use crate::record_activity;
use crate::worker::WorkerPool;

/// What one schedule execution did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionResult {
    Enqueued { job_count: u32 },
    /// Nothing pending; not an error.
    NoWork,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub schedule_id: ScheduleId,
    pub client_id: ClientId,
    #[serde(flatten)]
    pub result: ExecutionResult,
    pub next_run_at: DateTime<Utc>,
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub jobs_enqueued: u32,
    pub outcomes: Vec<ScheduleOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub tick_interval_secs: u64,
    pub timezone: String,
    pub last_tick: Option<TickReport>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    schedules: Arc<dyn ScheduleRepo>,
    activity: Arc<dyn ActivityRepo>,
    producer: Arc<Producer>,
    workers: Option<Arc<WorkerPool>>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    tick_interval: Duration,
    running: Mutex<Option<Running>>,
    last_tick: Mutex<Option<TickReport>>,
}

/// Runs due schedules through the producer on a fixed interval.
///
/// When a worker pool is attached it is started (if needed) before each
/// schedule executes. Cheap to clone; clones share the same loop and state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        schedules: Arc<dyn ScheduleRepo>,
        activity: Arc<dyn ActivityRepo>,
        producer: Arc<Producer>,
        workers: Option<Arc<WorkerPool>>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schedules,
                activity,
                producer,
                workers,
                clock,
                timezone,
                tick_interval,
                running: Mutex::new(None),
                last_tick: Mutex::new(None),
            }),
        }
    }

    /// Evaluate schedules against the current time.
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        self.tick_at(self.inner.clock.now()).await
    }

    /// Evaluate schedules against `now`.
    ///
    /// Due schedules run concurrently; a failing schedule is recorded in its
    /// outcome and never affects the others.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        let due: Vec<Schedule> = self
            .inner
            .schedules
            .list_active()
            .await?
            .into_iter()
            .filter(|schedule| schedule.is_due(now))
            .collect();

        let outcomes = join_all(due.iter().map(|schedule| self.execute(schedule, now))).await;

        let report = TickReport {
            at: now,
            due: due.len(),
            succeeded: outcomes
                .iter()
                .filter(|o| !matches!(o.result, ExecutionResult::Failed { .. }))
                .count(),
            failed: outcomes
                .iter()
                .filter(|o| matches!(o.result, ExecutionResult::Failed { .. }))
                .count(),
            jobs_enqueued: outcomes
                .iter()
                .map(|o| match o.result {
                    ExecutionResult::Enqueued { job_count } => job_count,
                    _ => 0,
                })
                .sum(),
            outcomes,
        };
        if report.due > 0 {
            info!(
                due = report.due,
                succeeded = report.succeeded,
                failed = report.failed,
                jobs = report.jobs_enqueued,
                "scheduler tick finished"
            );
        }
        *self.inner.last_tick.lock().await = Some(report.clone());
        Ok(report)
    }

    async fn execute(&self, schedule: &Schedule, now: DateTime<Utc>) -> ScheduleOutcome {
        let inner = &self.inner;
        if let Some(workers) = &inner.workers {
            workers.ensure_running().await;
        }

        let trigger = RunTrigger::Scheduled {
            schedule_id: schedule.id,
            jobs_per_run: schedule.jobs_per_run,
        };
        let mut partial_error = None;
        let result = match inner
            .producer
            .start_automation(schedule.client_id, trigger)
            .await
        {
            Ok(run) if run.job_count > 0 => {
                partial_error = run.error;
                ExecutionResult::Enqueued {
                    job_count: run.job_count,
                }
            }
            Ok(_) => ExecutionResult::NoWork,
            Err(e) => ExecutionResult::Failed {
                reason: Error::ScheduleExecution {
                    schedule_id: schedule.id,
                    message: e.to_string(),
                }
                .to_string(),
            },
        };

        let next_run_at = schedule.rule.next_run_after(now, inner.timezone);
        if let Err(e) = inner.schedules.update_next_run(schedule.id, next_run_at).await {
            error!(schedule_id = %schedule.id, error = %e, "failed to store next run time");
        }
        if matches!(result, ExecutionResult::Enqueued { .. }) {
            if let Err(e) = inner.schedules.update_last_run(schedule.id, now).await {
                error!(schedule_id = %schedule.id, error = %e, "failed to store last run time");
            }
        }

        let refs = ActivityRefs::client(schedule.client_id).with_schedule(schedule.id);
        let activity = match &result {
            ExecutionResult::Enqueued { job_count } => {
                info!(
                    schedule_id = %schedule.id,
                    client_id = %schedule.client_id,
                    job_count,
                    next_run_at = %next_run_at,
                    "schedule executed"
                );
                let activity = NewActivity::new(
                    ActivityKind::ScheduleExecuted,
                    format!("Schedule \"{}\" queued {} jobs", schedule.name, job_count),
                    refs,
                )
                .metadata(json!({
                    "job_count": job_count,
                    "next_run_at": next_run_at,
                    "error": partial_error,
                }));
                match &partial_error {
                    Some(error) => {
                        warn!(schedule_id = %schedule.id, error = %error, "schedule run stopped early");
                        activity.description(format!("Stopped early: {}", error))
                    }
                    None => activity,
                }
            }
            ExecutionResult::NoWork => {
                info!(
                    schedule_id = %schedule.id,
                    client_id = %schedule.client_id,
                    next_run_at = %next_run_at,
                    "schedule executed with no pending work"
                );
                NewActivity::new(
                    ActivityKind::ScheduleExecuted,
                    format!("Schedule \"{}\" found no pending work", schedule.name),
                    refs,
                )
                .metadata(json!({ "job_count": 0, "next_run_at": next_run_at }))
            }
            ExecutionResult::Failed { reason } => {
                error!(
                    schedule_id = %schedule.id,
                    client_id = %schedule.client_id,
                    error = %reason,
                    "schedule execution failed"
                );
                NewActivity::new(
                    ActivityKind::ScheduleFailed,
                    format!("Schedule \"{}\" failed", schedule.name),
                    refs,
                )
                .description(reason.clone())
                .metadata(json!({ "next_run_at": next_run_at }))
            }
        };
        record_activity(inner.activity.as_ref(), activity).await;

        ScheduleOutcome {
            schedule_id: schedule.id,
            client_id: schedule.client_id,
            result,
            next_run_at,
        }
    }

    /// Start the tick loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { scheduler.run(token).await });
        *running = Some(Running { cancel, task });
        info!(
            tick_secs = self.inner.tick_interval.as_secs(),
            timezone = %self.inner.timezone,
            "scheduler started"
        );
        true
    }

    /// Stop the tick loop and wait for the current tick to finish.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.inner.running.lock().await.take() else {
            return false;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
        info!("scheduler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running().await,
            tick_interval_secs: self.inner.tick_interval.as_secs(),
            timezone: self.inner.timezone.name().to_string(),
            last_tick: self.inner.last_tick.lock().await.clone(),
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }
}
