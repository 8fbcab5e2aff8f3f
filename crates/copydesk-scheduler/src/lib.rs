//! Scheduling, job broker and workers for the Copydesk content pipeline.
//!
//! - [`Scheduler`] ticks on a fixed interval and runs every due schedule
//!   concurrently through the [`Producer`].
//! - [`Producer`] turns a client's pending work items into ingest jobs,
//!   bounded by the schedule's per-run limit.
//! - [`broker`] holds the five queues, with PostgreSQL (`SKIP LOCKED`) and
//!   in-memory implementations.
//! - [`WorkerPool`] runs one worker per queue; the ingest worker drives each
//!   item through brief, article and approval.
//! - [`Monitor`] reports queue depth, health and stalled jobs.

pub mod broker;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod producer;
pub mod scheduler;
pub mod schedules;
pub mod worker;

pub use broker::{BrokerConfig, EnqueueResult, FailOutcome, JobBroker, JobState, QueuedJob};
pub use error::{BrokerError, BrokerResult, SchedulerError, SchedulerResult};
pub use handlers::PipelineDeps;
pub use monitor::{HealthLevel, Monitor, QueueStatus};
pub use producer::{AutomationRun, ManualRun, Producer, RunTrigger};
pub use scheduler::{ExecutionResult, ScheduleOutcome, Scheduler, SchedulerStatus, TickReport};
pub use schedules::ScheduleService;
pub use worker::{JobHandler, QueueWorker, WorkerPool};

use copydesk_core::activity::NewActivity;
use copydesk_db::ActivityRepo;
use tracing::warn;

/// Append to the activity log. A failed write is logged, never propagated.
pub(crate) async fn record_activity(repo: &dyn ActivityRepo, activity: NewActivity) {
    let kind = activity.kind;
    if let Err(e) = repo.record(activity).await {
        warn!(kind = %kind, error = %e, "failed to record activity");
    }
}
