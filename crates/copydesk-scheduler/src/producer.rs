//! Producer: turns a client's pending work items into ingest jobs.

use copydesk_core::activity::{ActivityKind, ActivityRefs, NewActivity};
use copydesk_core::job::{IngestJob, JobId, JobPayload};
use copydesk_core::work_item::{AutomationStatus, BatchProgress, WorkItem};
use copydesk_core::{BatchId, ClientId, Clock, Error, ScheduleId, WorkItemId};
use copydesk_db::{ActivityRepo, ScheduleRepo, WorkItemRepo};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::{JobBroker, JobState, QueuedJob};
use crate::error::SchedulerResult;
use crate::record_activity;

/// Who asked for a run, and therefore how its limit is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTrigger {
    /// A due schedule; its own `jobs_per_run` is the limit.
    Scheduled {
        schedule_id: ScheduleId,
        jobs_per_run: u32,
    },
    /// An operator request.
    Manual(ManualRun),
}

/// Options for an operator-triggered run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualRun {
    /// Explicit limit; defaults to the smallest `jobs_per_run` among the
    /// client's active schedules.
    #[serde(default)]
    pub job_limit: Option<u32>,
    /// Refuse to run unless one of the client's schedules is due.
    #[serde(default)]
    pub only_if_due: bool,
}

/// Outcome of one producer invocation.
///
/// `success == false` with `job_count == 0` means there was nothing to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRun {
    pub success: bool,
    pub job_count: u32,
    /// First batch jobs were released from.
    pub batch_id: Option<BatchId>,
    pub batch_ids: Vec<BatchId>,
    pub job_ids: Vec<JobId>,
    pub job_limit: u32,
    /// Set when enqueueing stopped early after some jobs were already queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AutomationRun {
    fn empty(job_limit: u32) -> Self {
        Self {
            success: false,
            job_count: 0,
            batch_id: None,
            batch_ids: Vec::new(),
            job_ids: Vec::new(),
            job_limit,
            error: None,
        }
    }
}

pub struct Producer {
    work_items: Arc<dyn WorkItemRepo>,
    schedules: Arc<dyn ScheduleRepo>,
    activity: Arc<dyn ActivityRepo>,
    broker: Arc<dyn JobBroker>,
    clock: Arc<dyn Clock>,
}

impl Producer {
    pub fn new(
        work_items: Arc<dyn WorkItemRepo>,
        schedules: Arc<dyn ScheduleRepo>,
        activity: Arc<dyn ActivityRepo>,
        broker: Arc<dyn JobBroker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            work_items,
            schedules,
            activity,
            broker,
            clock,
        }
    }

    /// Enqueue up to the resolved limit of the client's pending work items,
    /// oldest batch first.
    ///
    /// Each item is claimed with a conditional `pending → processing` update
    /// before its job is enqueued, so concurrent runs never enqueue the same
    /// item twice. If the broker rejects a job after others were already
    /// queued, the run stops there and reports what it queued along with the
    /// error.
    pub async fn start_automation(
        &self,
        client_id: ClientId,
        trigger: RunTrigger,
    ) -> SchedulerResult<AutomationRun> {
        let limit = self.resolve_limit(client_id, &trigger).await?;
        let mut run = AutomationRun::empty(limit);

        let pending = self
            .work_items
            .list_by_status(client_id, AutomationStatus::Pending)
            .await?;
        let batches = group_by_batch(
            pending
                .into_iter()
                .filter(|item| item.processing_started_at.is_none()),
        );
        if batches.is_empty() {
            debug!(client_id = %client_id, "no pending work items");
            return Ok(run);
        }

        'batches: for (batch_id, items) in batches {
            for item in items {
                if run.job_count >= limit {
                    break 'batches;
                }
                let job_id = match self.enqueue_item(&item).await {
                    Ok(Some(job_id)) => job_id,
                    Ok(None) => continue,
                    Err(e) if run.job_count > 0 => {
                        warn!(
                            client_id = %client_id,
                            job_count = run.job_count,
                            error = %e,
                            "enqueue failed partway through run"
                        );
                        run.error = Some(e.to_string());
                        break 'batches;
                    }
                    Err(e) => return Err(e),
                };
                run.job_count += 1;
                run.job_ids.push(job_id);
                if !run.batch_ids.contains(&batch_id) {
                    run.batch_ids.push(batch_id);
                }
            }
        }

        run.batch_id = run.batch_ids.first().copied();
        run.success = run.job_count > 0;
        if run.success {
            info!(
                client_id = %client_id,
                job_count = run.job_count,
                job_limit = limit,
                batches = run.batch_ids.len(),
                "automation started"
            );
            let mut refs = ActivityRefs::client(client_id);
            refs.batch_id = run.batch_id;
            let source = match &trigger {
                RunTrigger::Scheduled { schedule_id, .. } => {
                    refs.schedule_id = Some(*schedule_id);
                    "schedule"
                }
                RunTrigger::Manual(_) => "manual",
            };
            record_activity(
                self.activity.as_ref(),
                NewActivity::new(
                    ActivityKind::AutomationStarted,
                    format!("Automation started for {} items", run.job_count),
                    refs,
                )
                .metadata(json!({
                    "job_count": run.job_count,
                    "job_limit": limit,
                    "batch_ids": run.batch_ids,
                    "trigger": source,
                    "error": run.error,
                })),
            )
            .await;
        }
        Ok(run)
    }

    /// Per-batch status counts for a client.
    pub async fn batch_progress(&self, client_id: ClientId) -> SchedulerResult<Vec<BatchProgress>> {
        Ok(self.work_items.batch_progress(client_id).await?)
    }

    /// Operator reset of a failed work item back to pending.
    pub async fn reset_work_item(&self, id: WorkItemId) -> SchedulerResult<WorkItem> {
        let item = self.work_items.get(id).await?;
        if !self.work_items.reset_failed(id).await? {
            return Err(Error::Conflict(format!(
                "work item {} is {}, only failed items can be reset",
                id, item.status
            ))
            .into());
        }
        info!(work_item_id = %id, client_id = %item.client_id, "work item reset to pending");
        record_activity(
            self.activity.as_ref(),
            NewActivity::new(
                ActivityKind::WorkItemReset,
                "Work item reset to pending",
                ActivityRefs::client(item.client_id)
                    .with_work_item(id)
                    .with_batch(item.batch_id),
            ),
        )
        .await;
        Ok(self.work_items.get(id).await?)
    }

    /// Operator retry of a job in its queue's failed set.
    ///
    /// An exhausted ingest job has already failed its work item, so the item
    /// is moved back to `processing` first; if it has since moved elsewhere
    /// (for example a manual reset) the retry is refused.
    pub async fn retry_failed_job(&self, id: &JobId) -> SchedulerResult<QueuedJob> {
        let job = self
            .broker
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        if job.state != JobState::Failed {
            return Err(Error::Conflict(format!(
                "job {} is {}, only failed jobs can be retried",
                id, job.state
            ))
            .into());
        }

        let requeued_item = match &job.payload {
            JobPayload::Ingest(ingest) => {
                if !self.work_items.requeue_failed(ingest.work_item_id).await? {
                    let item = self.work_items.get(ingest.work_item_id).await?;
                    return Err(Error::Conflict(format!(
                        "work item {} is {}, only failed items can be retried",
                        item.id, item.status
                    ))
                    .into());
                }
                Some(ingest.work_item_id)
            }
            _ => None,
        };

        if let Err(e) = self.broker.retry_failed(id).await {
            if let Some(work_item_id) = requeued_item {
                self.work_items
                    .transition(work_item_id, AutomationStatus::Processing, AutomationStatus::Failed)
                    .await?;
            }
            return Err(e.into());
        }

        info!(job_id = %id, queue = %job.queue, "failed job requeued");
        let mut refs = ActivityRefs::client(job.payload.client_id()).with_job(id.as_str());
        refs.work_item_id = job.payload.work_item_id();
        refs.batch_id = job.payload.batch_id();
        record_activity(
            self.activity.as_ref(),
            NewActivity::new(
                ActivityKind::AutomationRetrying,
                format!("Retrying {} job by operator request", job.queue),
                refs,
            )
            .metadata(json!({ "previous_error": job.error, "manual": true })),
        )
        .await;

        Ok(self
            .broker
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?)
    }

    async fn resolve_limit(&self, client_id: ClientId, trigger: &RunTrigger) -> SchedulerResult<u32> {
        let manual = match trigger {
            RunTrigger::Scheduled { jobs_per_run, .. } => return Ok(*jobs_per_run),
            RunTrigger::Manual(manual) => manual,
        };

        let active = self.schedules.list_active_for_client(client_id).await?;
        let Some(smallest) = active.iter().map(|s| s.jobs_per_run).min() else {
            return Err(Error::PolicyMissing(client_id).into());
        };

        if manual.only_if_due {
            let now = self.clock.now();
            if !active.iter().any(|s| s.is_due(now)) {
                let next_run_at = active
                    .iter()
                    .filter_map(|s| s.next_run_at)
                    .min()
                    .unwrap_or(now);
                return Err(Error::NotDue { next_run_at }.into());
            }
        }

        match manual.job_limit {
            Some(0) => Err(Error::InvalidInput("job_limit must be at least 1".to_string()).into()),
            Some(limit) => Ok(limit),
            None => Ok(smallest),
        }
    }

    /// Claim one item and enqueue its ingest job.
    ///
    /// Returns `None` when the item was claimed by someone else or could not
    /// be turned into a job.
    async fn enqueue_item(&self, item: &WorkItem) -> SchedulerResult<Option<JobId>> {
        let claimed = self
            .work_items
            .transition(item.id, AutomationStatus::Pending, AutomationStatus::Processing)
            .await?;
        if !claimed {
            debug!(work_item_id = %item.id, "work item already claimed");
            return Ok(None);
        }

        let brief = match item.brief_request() {
            Ok(brief) => brief,
            Err(e) => {
                warn!(work_item_id = %item.id, error = %e, "work item cannot be automated");
                self.fail_item(item, &e.to_string()).await?;
                return Ok(None);
            }
        };

        let job_id = JobId::for_work_item(item.id, self.clock.now());
        let payload = JobPayload::Ingest(IngestJob::new(item.id, item.batch_id, brief));

        match self.broker.enqueue(job_id, payload).await {
            Ok(result) => {
                if !result.is_created() {
                    debug!(job_id = %result.job_id(), "ingest job already enqueued");
                }
                Ok(Some(result.job_id().clone()))
            }
            Err(e) => {
                warn!(work_item_id = %item.id, error = %e, "failed to enqueue ingest job");
                self.fail_item(item, &format!("failed to enqueue: {}", e))
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn fail_item(&self, item: &WorkItem, reason: &str) -> SchedulerResult<()> {
        self.work_items
            .transition(item.id, AutomationStatus::Processing, AutomationStatus::Failed)
            .await?;
        record_activity(
            self.activity.as_ref(),
            NewActivity::new(
                ActivityKind::AutomationFailed,
                "Automation failed",
                ActivityRefs::client(item.client_id)
                    .with_work_item(item.id)
                    .with_batch(item.batch_id),
            )
            .description(reason),
        )
        .await;
        Ok(())
    }
}

/// Group items by batch, keeping batches and items in first-seen order.
fn group_by_batch(items: impl IntoIterator<Item = WorkItem>) -> Vec<(BatchId, Vec<WorkItem>)> {
    let mut batches: Vec<(BatchId, Vec<WorkItem>)> = Vec::new();
    for item in items {
        match batches.iter_mut().find(|(id, _)| *id == item.batch_id) {
            Some((_, members)) => members.push(item),
            None => batches.push((item.batch_id, vec![item])),
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(batch_id: BatchId, keyword: &str) -> WorkItem {
        let mut payload = serde_json::Map::new();
        payload.insert("keyword".to_string(), json!(keyword));
        WorkItem {
            id: WorkItemId::new(),
            client_id: ClientId::new(),
            batch_id,
            payload,
            status: AutomationStatus::Pending,
            processing_started_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_group_by_batch_keeps_first_seen_order() {
        let a = BatchId::new();
        let b = BatchId::new();
        let grouped = group_by_batch(vec![item(a, "1"), item(b, "2"), item(a, "3")]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, a);
        let keywords: Vec<_> = grouped[0].1.iter().filter_map(|i| i.keyword()).collect();
        assert_eq!(keywords, vec!["1", "3"]);
        assert_eq!(grouped[1].0, b);
    }

    #[test]
    fn test_manual_run_defaults() {
        let run: ManualRun = serde_json::from_str("{}").unwrap();
        assert_eq!(run, ManualRun::default());
        let run: ManualRun = serde_json::from_str(r#"{"job_limit": 3}"#).unwrap();
        assert_eq!(run.job_limit, Some(3));
        assert!(!run.only_if_due);
    }
}
