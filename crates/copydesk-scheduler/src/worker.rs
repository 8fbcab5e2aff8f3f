//! Queue workers and the worker pool.
//!
//! Each queue has exactly one worker, so at most one job per queue is in
//! flight. Retries are left to the broker: a failed attempt is reported back
//! with [`JobBroker::fail`] and the handler is told what the broker decided.

use async_trait::async_trait;
use copydesk_config::WorkerConfig;
use copydesk_core::job::QueueName;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{FailOutcome, JobBroker, QueuedJob};
use crate::error::SchedulerResult;
use crate::handlers::{
    ApprovalHandler, ArticleHandler, BriefHandler, IngestHandler, PipelineDeps, PublishHandler,
};

/// Backoff multiplier applied to the poll interval after a broker error.
const ERROR_BACKOFF_FACTOR: u32 = 5;

/// Processes jobs claimed from one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    async fn handle(&self, job: &QueuedJob) -> copydesk_core::Result<()>;

    /// Called after the broker has recorded a failed attempt.
    async fn on_failure(
        &self,
        job: &QueuedJob,
        error: &copydesk_core::Error,
        outcome: &FailOutcome,
    ) {
        let _ = (job, error, outcome);
    }
}

/// A worker that claims and executes jobs from a single queue.
pub struct QueueWorker {
    id: String,
    broker: Arc<dyn JobBroker>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
}

impl QueueWorker {
    pub fn new(
        id: impl Into<String>,
        broker: Arc<dyn JobBroker>,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            broker,
            handler,
            poll_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> QueueName {
        self.handler.queue()
    }

    /// Claim and process at most one job. Returns whether a job was processed.
    pub async fn run_once(&self) -> SchedulerResult<bool> {
        let queue = self.handler.queue();
        let Some(job) = self.broker.claim(queue, &self.id).await? else {
            return Ok(false);
        };
        info!(
            worker_id = %self.id,
            job_id = %job.id,
            queue = %queue,
            attempt = job.attempts_made + 1,
            "claimed job"
        );

        match self.handler.handle(&job).await {
            Ok(()) => {
                self.broker.complete(&job.id).await?;
                info!(job_id = %job.id, queue = %queue, "job completed");
            }
            Err(err) => {
                let outcome = self.broker.fail(&job.id, &err.to_string()).await?;
                match &outcome {
                    FailOutcome::Retrying {
                        attempts_made,
                        run_at,
                    } => warn!(
                        job_id = %job.id,
                        queue = %queue,
                        attempts = attempts_made,
                        retry_at = %run_at,
                        error = %err,
                        "job failed, will retry"
                    ),
                    FailOutcome::Exhausted { attempts_made } => error!(
                        job_id = %job.id,
                        queue = %queue,
                        attempts = attempts_made,
                        error = %err,
                        "job failed, no attempts left"
                    ),
                }
                self.handler.on_failure(&job, &err, &outcome).await;
            }
        }
        Ok(true)
    }

    /// Run the worker loop until `cancel` fires.
    ///
    /// Cancellation is observed between jobs; an in-flight job always finishes.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker_id = %self.id, queue = %self.queue(), "starting worker");

        while !cancel.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(true) => None,
                Ok(false) => Some(self.poll_interval),
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "worker iteration failed");
                    Some(self.poll_interval * ERROR_BACKOFF_FACTOR)
                }
            };
            if let Some(wait) = idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(wait) => {}
                }
            }
        }

        info!(worker_id = %self.id, queue = %self.queue(), "worker stopped");
    }
}

struct RunningPool {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// The set of queue workers, started and stopped as a unit.
///
/// Constructed once at startup and shared by handle; the scheduler calls
/// [`WorkerPool::ensure_running`] before producing work.
pub struct WorkerPool {
    workers: Vec<Arc<QueueWorker>>,
    running: Mutex<Option<RunningPool>>,
}

impl WorkerPool {
    pub fn new(workers: Vec<QueueWorker>) -> Self {
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
            running: Mutex::new(None),
        }
    }

    /// One worker per queue: the ingest pipeline plus the standalone steps.
    pub fn for_pipeline(
        broker: Arc<dyn JobBroker>,
        deps: PipelineDeps,
        config: &WorkerConfig,
    ) -> Self {
        let deps = Arc::new(deps);
        let handlers: Vec<Arc<dyn JobHandler>> = vec![
            Arc::new(IngestHandler::new(deps.clone())),
            Arc::new(BriefHandler::new(deps.clone())),
            Arc::new(ArticleHandler::new(deps.clone())),
            Arc::new(ApprovalHandler::new(deps.clone())),
            Arc::new(PublishHandler::new(deps)),
        ];
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let workers = handlers
            .into_iter()
            .map(|handler| {
                let id = format!("{}-worker-{}", handler.queue(), &suffix[..8]);
                QueueWorker::new(id, broker.clone(), handler, config.poll_interval)
            })
            .collect();
        Self::new(workers)
    }

    pub fn queues(&self) -> Vec<QueueName> {
        self.workers.iter().map(|w| w.queue()).collect()
    }

    /// Start every worker unless the pool is already running.
    ///
    /// Returns `true` if this call started the pool.
    pub async fn ensure_running(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let tasks = self
            .workers
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                let cancel = cancel.child_token();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect();
        *running = Some(RunningPool { cancel, tasks });
        info!(workers = self.workers.len(), "worker pool started");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Signal every worker to stop and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        let Some(pool) = self.running.lock().await.take() else {
            return;
        };
        pool.cancel.cancel();
        for task in pool.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }

    /// Run every worker in turn until a full pass finds nothing to claim.
    ///
    /// Returns the number of jobs processed. Jobs delayed by backoff are not
    /// waited for.
    pub async fn run_until_idle(&self) -> SchedulerResult<usize> {
        let mut processed = 0;
        loop {
            let mut progressed = false;
            for worker in &self.workers {
                while worker.run_once().await? {
                    processed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(processed);
            }
        }
    }
}
