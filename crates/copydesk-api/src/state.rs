//! Application state.

use copydesk_config::SystemConfig;
use copydesk_core::Clock;
use copydesk_core::collaborator::Collaborators;
use copydesk_db::{ActivityRepo, ScheduleRepo, WorkItemRepo};
use copydesk_scheduler::{
    JobBroker, Monitor, PipelineDeps, Producer, ScheduleService, Scheduler, WorkerPool,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Storage the server runs against.
pub struct Backends {
    pub work_items: Arc<dyn WorkItemRepo>,
    pub schedules: Arc<dyn ScheduleRepo>,
    pub activity: Arc<dyn ActivityRepo>,
    pub broker: Arc<dyn JobBroker>,
    /// Pinged by the readiness check when present.
    pub pool: Option<PgPool>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: Option<PgPool>,
    pub activity: Arc<dyn ActivityRepo>,
    pub broker: Arc<dyn JobBroker>,
    pub producer: Arc<Producer>,
    pub schedules: Arc<ScheduleService>,
    pub scheduler: Scheduler,
    pub workers: Arc<WorkerPool>,
    pub monitor: Arc<Monitor>,
}

impl AppState {
    /// Wire the producer, worker pool, scheduler and monitor over `backends`.
    pub fn new(
        backends: Backends,
        config: &SystemConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let Backends {
            work_items,
            schedules,
            activity,
            broker,
            pool,
        } = backends;

        let producer = Arc::new(Producer::new(
            work_items.clone(),
            schedules.clone(),
            activity.clone(),
            broker.clone(),
            clock.clone(),
        ));
        let workers = Arc::new(WorkerPool::for_pipeline(
            broker.clone(),
            PipelineDeps {
                work_items,
                activity: activity.clone(),
                collaborators,
                timeouts: config.timeouts,
            },
            &config.worker,
        ));
        let scheduler = Scheduler::new(
            schedules.clone(),
            activity.clone(),
            producer.clone(),
            Some(workers.clone()),
            clock.clone(),
            config.scheduler.timezone,
            config.scheduler.tick,
        );
        let schedule_service = Arc::new(ScheduleService::new(
            schedules,
            clock.clone(),
            config.scheduler.timezone,
        ));
        let monitor = Arc::new(Monitor::new(
            broker.clone(),
            config.monitor,
            config.worker.stall_after,
            clock,
        ));

        Self {
            pool,
            activity,
            broker,
            producer,
            schedules: schedule_service,
            scheduler,
            workers,
            monitor,
        }
    }
}
