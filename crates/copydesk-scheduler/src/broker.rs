//! Job broker: five durable, priority- and retry-aware queues.
//!
//! Jobs move `waiting → active → completed`, or on failure either to
//! `delayed` (retried after exponential backoff) or to `failed` once the
//! queue's attempt cap is reached. Failed jobs stay in the broker until an
//! operator retries or removes them.

pub mod memory;
pub mod postgres;

pub use memory::MemoryBroker;
pub use postgres::PgJobBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copydesk_config::SystemConfig;
use copydesk_core::job::{JobId, JobPayload, QueueName, QueuePolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BrokerError, BrokerResult};

/// Lifecycle state of a job inside the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    /// Waiting for its backoff delay to pass.
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = BrokerError;

    fn from_str(s: &str) -> BrokerResult<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(BrokerError::InvalidData(format!("unknown job state: {}", other))),
        }
    }
}

/// A job as stored by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub priority: i32,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of an enqueue, distinguishing idempotency hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    Created(JobId),
    /// A job with this id already exists; nothing was added.
    Duplicate(JobId),
}

impl EnqueueResult {
    pub fn job_id(&self) -> &JobId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// What the broker did with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job will be retried at `run_at`.
    Retrying {
        attempts_made: u32,
        run_at: DateTime<Utc>,
    },
    /// No attempts left; the job is now in the failed set.
    Exhausted { attempts_made: u32 },
}

impl FailOutcome {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FailOutcome::Exhausted { .. })
    }
}

/// Job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
    pub paused: bool,
}

impl QueueCounts {
    /// Jobs not yet finished.
    pub fn backlog(&self) -> u64 {
        self.waiting + self.delayed + self.active
    }

    pub(crate) fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting += count,
            JobState::Delayed => self.delayed += count,
            JobState::Active => self.active += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
        }
    }
}

/// Per-queue policies and retention limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    policies: BTreeMap<QueueName, QueuePolicy>,
    /// Completed jobs kept per queue; older ones are purged.
    pub keep_completed: u32,
    /// Failed jobs kept per queue; older ones are purged.
    pub keep_failed: u32,
}

impl BrokerConfig {
    pub fn from_system(config: &SystemConfig) -> Self {
        Self {
            policies: QueueName::ALL
                .into_iter()
                .map(|queue| (queue, config.queue_policy(queue)))
                .collect(),
            keep_completed: config.retention.completed,
            keep_failed: config.retention.failed,
        }
    }

    pub fn policy(&self, queue: QueueName) -> QueuePolicy {
        self.policies
            .get(&queue)
            .copied()
            .unwrap_or_else(|| queue.default_policy())
    }

    pub fn with_policy(mut self, queue: QueueName, policy: QueuePolicy) -> Self {
        self.policies.insert(queue, policy);
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from_system(&SystemConfig::default())
    }
}

/// Convert a retry delay to a chrono duration.
pub(crate) fn delay(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2))
}

/// Durable queue substrate.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Add a job to the queue its payload belongs on.
    ///
    /// A job whose id already exists is not added again.
    async fn enqueue(&self, id: JobId, payload: JobPayload) -> BrokerResult<EnqueueResult>;

    /// Claim the next runnable job on `queue`, if the queue is not paused.
    ///
    /// Lower priority numbers go first, then earlier `run_at`, then FIFO.
    async fn claim(&self, queue: QueueName, worker_id: &str) -> BrokerResult<Option<QueuedJob>>;

    async fn complete(&self, id: &JobId) -> BrokerResult<()>;

    /// Record a failed attempt and either schedule a retry or move the job
    /// to the failed set.
    async fn fail(&self, id: &JobId, error: &str) -> BrokerResult<FailOutcome>;

    async fn get(&self, id: &JobId) -> BrokerResult<Option<QueuedJob>>;

    async fn counts(&self, queue: QueueName) -> BrokerResult<QueueCounts>;

    /// Stop handing out jobs. In-flight jobs are not affected.
    async fn pause(&self, queue: QueueName) -> BrokerResult<()>;

    async fn resume(&self, queue: QueueName) -> BrokerResult<()>;

    async fn is_paused(&self, queue: QueueName) -> BrokerResult<bool>;

    /// Remove waiting and delayed jobs. Returns how many were removed.
    async fn drain(&self, queue: QueueName) -> BrokerResult<u64>;

    /// Failed jobs, most recent first.
    async fn list_failed(&self, queue: QueueName, limit: u32) -> BrokerResult<Vec<QueuedJob>>;

    /// Move a failed job back to waiting with its attempts reset.
    async fn retry_failed(&self, id: &JobId) -> BrokerResult<()>;

    /// Delete a job that is not currently active. Returns `false` if absent.
    async fn remove(&self, id: &JobId) -> BrokerResult<bool>;

    /// Active jobs claimed before `claimed_before`.
    async fn stalled(&self, claimed_before: DateTime<Utc>) -> BrokerResult<Vec<QueuedJob>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrips_through_str() {
        for state in [
            JobState::Waiting,
            JobState::Delayed,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("stuck".parse::<JobState>().is_err());
    }

    #[test]
    fn test_broker_config_applies_overrides() {
        let config = copydesk_config::parse_system_config(
            r#"
            retention completed=3 failed=4
            queue "brief" attempts=7
            "#,
        )
        .unwrap();
        let broker = BrokerConfig::from_system(&config);
        assert_eq!(broker.keep_completed, 3);
        assert_eq!(broker.keep_failed, 4);
        assert_eq!(broker.policy(QueueName::Brief).attempts, 7);
        assert_eq!(
            broker.policy(QueueName::Ingest),
            QueueName::Ingest.default_policy()
        );
    }

    #[test]
    fn test_counts_backlog() {
        let mut counts = QueueCounts::default();
        counts.add(JobState::Waiting, 2);
        counts.add(JobState::Delayed, 1);
        counts.add(JobState::Active, 1);
        counts.add(JobState::Completed, 9);
        assert_eq!(counts.backlog(), 4);
    }
}
