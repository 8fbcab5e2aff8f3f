//! In-process broker used by tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copydesk_core::job::{JobId, JobPayload, QueueName};
use copydesk_core::{Clock, SystemClock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    BrokerConfig, EnqueueResult, FailOutcome, JobBroker, JobState, QueueCounts, QueuedJob, delay,
};
use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Entry>,
    paused: HashSet<QueueName>,
    next_seq: u64,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    job: QueuedJob,
}

impl State {
    fn active_mut(&mut self, id: &JobId) -> BrokerResult<&mut QueuedJob> {
        let entry = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(id.to_string()))?;
        if entry.job.state != JobState::Active {
            return Err(BrokerError::InvalidState {
                id: id.to_string(),
                state: entry.job.state.to_string(),
                expected: JobState::Active.to_string(),
            });
        }
        Ok(&mut entry.job)
    }

    /// Drop the oldest finished jobs in `state` beyond `keep`.
    fn purge(&mut self, queue: QueueName, state: JobState, keep: u32) {
        let mut finished: Vec<(Option<DateTime<Utc>>, u64, JobId)> = self
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == state)
            .map(|e| (e.job.finished_at, e.seq, e.job.id.clone()))
            .collect();
        if finished.len() <= keep as usize {
            return;
        }
        finished.sort();
        let excess = finished.len() - keep as usize;
        for (_, _, id) in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
    }
}

/// Broker that keeps every queue in memory.
#[derive(Debug)]
pub struct MemoryBroker {
    state: Mutex<State>,
    config: BrokerConfig,
    clock: Arc<dyn Clock>,
}

impl MemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BrokerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            config,
            clock,
        }
    }

    /// All jobs on `queue` in enqueue order.
    pub async fn jobs(&self, queue: QueueName) -> Vec<QueuedJob> {
        let state = self.state.lock().await;
        let mut entries: Vec<&Entry> = state
            .jobs
            .values()
            .filter(|e| e.job.queue == queue)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn enqueue(&self, id: JobId, payload: JobPayload) -> BrokerResult<EnqueueResult> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&id) {
            return Ok(EnqueueResult::Duplicate(id));
        }
        let queue = payload.queue();
        let policy = self.config.policy(queue);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            id.clone(),
            Entry {
                seq,
                job: QueuedJob {
                    id: id.clone(),
                    queue,
                    payload,
                    priority: policy.priority,
                    state: JobState::Waiting,
                    attempts_made: 0,
                    max_attempts: policy.attempts,
                    run_at: now,
                    claimed_by: None,
                    claimed_at: None,
                    error: None,
                    created_at: now,
                    finished_at: None,
                },
            },
        );
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(&self, queue: QueueName, worker_id: &str) -> BrokerResult<Option<QueuedJob>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.paused.contains(&queue) {
            return Ok(None);
        }
        let next = state
            .jobs
            .values_mut()
            .filter(|e| {
                e.job.queue == queue
                    && matches!(e.job.state, JobState::Waiting | JobState::Delayed)
                    && e.job.run_at <= now
            })
            .min_by_key(|e| (e.job.priority, e.job.run_at, e.seq));
        Ok(next.map(|entry| {
            entry.job.state = JobState::Active;
            entry.job.claimed_by = Some(worker_id.to_string());
            entry.job.claimed_at = Some(now);
            entry.job.clone()
        }))
    }

    async fn complete(&self, id: &JobId) -> BrokerResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let job = state.active_mut(id)?;
        job.state = JobState::Completed;
        job.finished_at = Some(now);
        job.error = None;
        let queue = job.queue;
        state.purge(queue, JobState::Completed, self.config.keep_completed);
        Ok(())
    }

    async fn fail(&self, id: &JobId, error: &str) -> BrokerResult<FailOutcome> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let job = state.active_mut(id)?;
        job.attempts_made += 1;
        job.error = Some(error.to_string());
        job.claimed_by = None;
        job.claimed_at = None;

        let attempts_made = job.attempts_made;
        if attempts_made < job.max_attempts {
            let backoff = self.config.policy(job.queue).backoff_delay(attempts_made);
            let run_at = now + delay(backoff);
            job.state = JobState::Delayed;
            job.run_at = run_at;
            return Ok(FailOutcome::Retrying {
                attempts_made,
                run_at,
            });
        }

        job.state = JobState::Failed;
        job.finished_at = Some(now);
        let queue = job.queue;
        state.purge(queue, JobState::Failed, self.config.keep_failed);
        Ok(FailOutcome::Exhausted { attempts_made })
    }

    async fn get(&self, id: &JobId) -> BrokerResult<Option<QueuedJob>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(id).map(|e| e.job.clone()))
    }

    async fn counts(&self, queue: QueueName) -> BrokerResult<QueueCounts> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts {
            paused: state.paused.contains(&queue),
            ..Default::default()
        };
        for entry in state.jobs.values().filter(|e| e.job.queue == queue) {
            counts.add(entry.job.state, 1);
        }
        Ok(counts)
    }

    async fn pause(&self, queue: QueueName) -> BrokerResult<()> {
        self.state.lock().await.paused.insert(queue);
        Ok(())
    }

    async fn resume(&self, queue: QueueName) -> BrokerResult<()> {
        self.state.lock().await.paused.remove(&queue);
        Ok(())
    }

    async fn is_paused(&self, queue: QueueName) -> BrokerResult<bool> {
        Ok(self.state.lock().await.paused.contains(&queue))
    }

    async fn drain(&self, queue: QueueName) -> BrokerResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, e| {
            !(e.job.queue == queue
                && matches!(e.job.state, JobState::Waiting | JobState::Delayed))
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn list_failed(&self, queue: QueueName, limit: u32) -> BrokerResult<Vec<QueuedJob>> {
        let state = self.state.lock().await;
        let mut failed: Vec<&Entry> = state
            .jobs
            .values()
            .filter(|e| e.job.queue == queue && e.job.state == JobState::Failed)
            .collect();
        failed.sort_by(|a, b| {
            b.job
                .finished_at
                .cmp(&a.job.finished_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(failed
            .into_iter()
            .take(limit as usize)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn retry_failed(&self, id: &JobId) -> BrokerResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let entry = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(id.to_string()))?;
        if entry.job.state != JobState::Failed {
            return Err(BrokerError::InvalidState {
                id: id.to_string(),
                state: entry.job.state.to_string(),
                expected: JobState::Failed.to_string(),
            });
        }
        let job = &mut entry.job;
        job.state = JobState::Waiting;
        job.attempts_made = 0;
        job.run_at = now;
        job.error = None;
        job.finished_at = None;
        Ok(())
    }

    async fn remove(&self, id: &JobId) -> BrokerResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get(id) {
            None => Ok(false),
            Some(entry) if entry.job.state == JobState::Active => Err(BrokerError::InvalidState {
                id: id.to_string(),
                state: JobState::Active.to_string(),
                expected: "not active".to_string(),
            }),
            Some(_) => {
                state.jobs.remove(id);
                Ok(true)
            }
        }
    }

    async fn stalled(&self, claimed_before: DateTime<Utc>) -> BrokerResult<Vec<QueuedJob>> {
        let state = self.state.lock().await;
        let mut stalled: Vec<QueuedJob> = state
            .jobs
            .values()
            .filter(|e| {
                e.job.state == JobState::Active
                    && e.job.claimed_at.is_some_and(|at| at < claimed_before)
            })
            .map(|e| e.job.clone())
            .collect();
        stalled.sort_by_key(|job| job.claimed_at);
        Ok(stalled)
    }
}
