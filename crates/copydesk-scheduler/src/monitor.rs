//! Read-only queue introspection: depth, health and stalled jobs.

use copydesk_config::MonitorConfig;
use copydesk_core::Clock;
use copydesk_core::job::QueueName;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::broker::{JobBroker, QueueCounts, QueuedJob, delay};
use crate::error::SchedulerResult;

/// Queue health derived from backlog depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue: QueueName,
    #[serde(flatten)]
    pub counts: QueueCounts,
    pub health: HealthLevel,
}

pub struct Monitor {
    broker: Arc<dyn JobBroker>,
    thresholds: MonitorConfig,
    stall_after: Duration,
    clock: Arc<dyn Clock>,
}

impl Monitor {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        thresholds: MonitorConfig,
        stall_after: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            broker,
            thresholds,
            stall_after,
            clock,
        }
    }

    /// Health for a queue with the given counts.
    ///
    /// Depth is the number of jobs waiting to run, including delayed retries.
    pub fn health(&self, counts: &QueueCounts) -> HealthLevel {
        let depth = counts.waiting + counts.delayed;
        if depth >= self.thresholds.critical_depth {
            HealthLevel::Critical
        } else if depth >= self.thresholds.warning_depth {
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        }
    }

    pub async fn queue_status(&self, queue: QueueName) -> SchedulerResult<QueueStatus> {
        let counts = self.broker.counts(queue).await?;
        Ok(QueueStatus {
            queue,
            health: self.health(&counts),
            counts,
        })
    }

    pub async fn all_queues(&self) -> SchedulerResult<Vec<QueueStatus>> {
        let mut statuses = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            statuses.push(self.queue_status(queue).await?);
        }
        Ok(statuses)
    }

    /// Worst health across all queues.
    pub async fn overall_health(&self) -> SchedulerResult<HealthLevel> {
        Ok(self
            .all_queues()
            .await?
            .iter()
            .map(|status| status.health)
            .max()
            .unwrap_or(HealthLevel::Healthy))
    }

    /// Find active jobs older than the stall threshold and log each one.
    ///
    /// Stalled jobs are only reported; recovering them is an operator action.
    pub async fn check_stalled(&self) -> SchedulerResult<Vec<QueuedJob>> {
        let cutoff = self.clock.now() - delay(self.stall_after);
        let stalled = self.broker.stalled(cutoff).await?;
        for job in &stalled {
            warn!(
                job_id = %job.id,
                queue = %job.queue,
                claimed_by = job.claimed_by.as_deref().unwrap_or("unknown"),
                claimed_at = ?job.claimed_at,
                "job appears stalled"
            );
        }
        Ok(stalled)
    }

    /// Scan for stalled jobs every `every` until cancelled.
    pub async fn run(&self, every: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.check_stalled().await {
                        error!(error = %e, "stalled job scan failed");
                    }
                }
            }
        }
    }
}
