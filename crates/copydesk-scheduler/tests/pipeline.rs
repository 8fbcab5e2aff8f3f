//! End-to-end pipeline tests against the in-memory repositories and broker.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use copydesk_config::{StepTimeouts, WorkerConfig};
use copydesk_core::activity::ActivityKind;
use copydesk_core::collaborator::{
    ApprovalDispatcher, ApprovalReceipt, ApprovalRequest, Article, ArticleGenerator,
    ArticleRequest, Brief, BriefGenerator, BriefRequest, Collaborators, PipelineStep,
    PublishReceipt, PublishRequest, Publisher,
};
use copydesk_core::job::{JobId, JobPayload, PublishJob, QueueName};
use copydesk_core::schedule::{NewSchedule, RecurrenceRule, Schedule, ScheduleState};
use copydesk_core::work_item::{AutomationStatus, BatchProgress, WorkItem};
use copydesk_core::{BatchId, ClientId, Clock, Error, ManualClock, ScheduleId, WorkItemId};
use copydesk_db::memory::{MemoryActivityRepo, MemoryScheduleRepo, MemoryWorkItemRepo};
use copydesk_db::{DbError, DbResult, WorkItemRepo};
use copydesk_scheduler::broker::{MemoryBroker, QueueCounts};
use copydesk_scheduler::{
    BrokerConfig, BrokerError, BrokerResult, EnqueueResult, ExecutionResult, FailOutcome,
    JobBroker, JobState, ManualRun, PipelineDeps, Producer, QueuedJob, RunTrigger,
    ScheduleService, Scheduler, SchedulerError, WorkerPool,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct StubServices {
    briefs: AtomicUsize,
    articles: AtomicUsize,
    approvals: AtomicUsize,
    publishes: AtomicUsize,
    fail_articles: AtomicBool,
}

#[async_trait]
impl BriefGenerator for StubServices {
    async fn generate_brief(&self, request: &BriefRequest) -> copydesk_core::Result<Brief> {
        self.briefs.fetch_add(1, Ordering::SeqCst);
        Ok(Brief {
            id: format!("brief-{}", request.keyword),
            title: format!("All about {}", request.keyword),
            key_points: vec!["one".to_string(), "two".to_string()],
            word_count: 800,
        })
    }
}

#[async_trait]
impl ArticleGenerator for StubServices {
    async fn generate_article(&self, request: &ArticleRequest) -> copydesk_core::Result<Article> {
        self.articles.fetch_add(1, Ordering::SeqCst);
        if self.fail_articles.load(Ordering::SeqCst) {
            return Err(Error::step(PipelineStep::Article, "model overloaded"));
        }
        Ok(Article {
            id: format!("article-{}", request.brief_id),
            title: request.title.clone(),
            content: "body".to_string(),
        })
    }
}

#[async_trait]
impl ApprovalDispatcher for StubServices {
    async fn send_for_approval(
        &self,
        _request: &ApprovalRequest,
    ) -> copydesk_core::Result<ApprovalReceipt> {
        self.approvals.fetch_add(1, Ordering::SeqCst);
        Ok(ApprovalReceipt { success: true })
    }
}

#[async_trait]
impl Publisher for StubServices {
    async fn publish(&self, request: &PublishRequest) -> copydesk_core::Result<PublishReceipt> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(PublishReceipt {
            url: Some(format!("https://blog.example.com/{}", request.article_id)),
        })
    }
}

/// Fails every read of one client's pending items.
struct BrokenClientRepo {
    inner: MemoryWorkItemRepo,
    broken: ClientId,
}

#[async_trait]
impl WorkItemRepo for BrokenClientRepo {
    async fn insert_batch(
        &self,
        client_id: ClientId,
        batch_id: BatchId,
        payloads: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> DbResult<Vec<WorkItem>> {
        self.inner.insert_batch(client_id, batch_id, payloads).await
    }

    async fn get(&self, id: WorkItemId) -> DbResult<WorkItem> {
        self.inner.get(id).await
    }

    async fn list_by_status(
        &self,
        client_id: ClientId,
        status: AutomationStatus,
    ) -> DbResult<Vec<WorkItem>> {
        if client_id == self.broken {
            return Err(DbError::InvalidData("corrupt row".to_string()));
        }
        self.inner.list_by_status(client_id, status).await
    }

    async fn transition(
        &self,
        id: WorkItemId,
        from: AutomationStatus,
        to: AutomationStatus,
    ) -> DbResult<bool> {
        self.inner.transition(id, from, to).await
    }

    async fn reset_failed(&self, id: WorkItemId) -> DbResult<bool> {
        self.inner.reset_failed(id).await
    }

    async fn requeue_failed(&self, id: WorkItemId) -> DbResult<bool> {
        self.inner.requeue_failed(id).await
    }

    async fn batch_progress(&self, client_id: ClientId) -> DbResult<Vec<BatchProgress>> {
        self.inner.batch_progress(client_id).await
    }
}

/// Accepts a fixed number of jobs, then rejects every enqueue.
struct FlakyBroker {
    inner: MemoryBroker,
    accept: AtomicUsize,
}

#[async_trait]
impl JobBroker for FlakyBroker {
    async fn enqueue(&self, id: JobId, payload: JobPayload) -> BrokerResult<EnqueueResult> {
        if self
            .accept
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return Err(BrokerError::InvalidData("queue unavailable".to_string()));
        }
        self.inner.enqueue(id, payload).await
    }

    async fn claim(&self, queue: QueueName, worker_id: &str) -> BrokerResult<Option<QueuedJob>> {
        self.inner.claim(queue, worker_id).await
    }

    async fn complete(&self, id: &JobId) -> BrokerResult<()> {
        self.inner.complete(id).await
    }

    async fn fail(&self, id: &JobId, error: &str) -> BrokerResult<FailOutcome> {
        self.inner.fail(id, error).await
    }

    async fn get(&self, id: &JobId) -> BrokerResult<Option<QueuedJob>> {
        self.inner.get(id).await
    }

    async fn counts(&self, queue: QueueName) -> BrokerResult<QueueCounts> {
        self.inner.counts(queue).await
    }

    async fn pause(&self, queue: QueueName) -> BrokerResult<()> {
        self.inner.pause(queue).await
    }

    async fn resume(&self, queue: QueueName) -> BrokerResult<()> {
        self.inner.resume(queue).await
    }

    async fn is_paused(&self, queue: QueueName) -> BrokerResult<bool> {
        self.inner.is_paused(queue).await
    }

    async fn drain(&self, queue: QueueName) -> BrokerResult<u64> {
        self.inner.drain(queue).await
    }

    async fn list_failed(&self, queue: QueueName, limit: u32) -> BrokerResult<Vec<QueuedJob>> {
        self.inner.list_failed(queue, limit).await
    }

    async fn retry_failed(&self, id: &JobId) -> BrokerResult<()> {
        self.inner.retry_failed(id).await
    }

    async fn remove(&self, id: &JobId) -> BrokerResult<bool> {
        self.inner.remove(id).await
    }

    async fn stalled(&self, claimed_before: DateTime<Utc>) -> BrokerResult<Vec<QueuedJob>> {
        self.inner.stalled(claimed_before).await
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    work_items: Arc<dyn WorkItemRepo>,
    activity: Arc<MemoryActivityRepo>,
    broker: Arc<MemoryBroker>,
    services: Arc<StubServices>,
    producer: Arc<Producer>,
    scheduler: Scheduler,
    schedule_service: ScheduleService,
    pool: WorkerPool,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
}

fn nine_am() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let work_items: Arc<dyn WorkItemRepo> =
            Arc::new(MemoryWorkItemRepo::with_clock(clock.clone()));
        Self::with_work_items(clock, work_items)
    }

    fn with_work_items(clock: Arc<ManualClock>, work_items: Arc<dyn WorkItemRepo>) -> Self {
        let schedules = Arc::new(MemoryScheduleRepo::with_clock(clock.clone()));
        let activity = Arc::new(MemoryActivityRepo::with_clock(clock.clone()));
        let broker = Arc::new(MemoryBroker::with_clock(
            BrokerConfig::default(),
            clock.clone(),
        ));
        let services = Arc::new(StubServices::default());

        let producer = Arc::new(Producer::new(
            work_items.clone(),
            schedules.clone(),
            activity.clone(),
            broker.clone(),
            clock.clone(),
        ));
        let scheduler = Scheduler::new(
            schedules.clone(),
            activity.clone(),
            producer.clone(),
            None,
            clock.clone(),
            Tz::UTC,
            std::time::Duration::from_secs(60),
        );
        let schedule_service = ScheduleService::new(schedules, clock.clone(), Tz::UTC);
        let deps = PipelineDeps {
            work_items: work_items.clone(),
            activity: activity.clone(),
            collaborators: Collaborators {
                brief: services.clone(),
                article: services.clone(),
                approval: services.clone(),
                publisher: services.clone(),
            },
            timeouts: StepTimeouts::default(),
        };
        let pool = WorkerPool::for_pipeline(broker.clone(), deps, &WorkerConfig::default());

        Self {
            clock,
            work_items,
            activity,
            broker,
            services,
            producer,
            scheduler,
            schedule_service,
            pool,
        }
    }

    async fn daily_schedule(&self, client_id: ClientId, jobs_per_run: u32) -> Schedule {
        self.schedule_service
            .create(NewSchedule {
                client_id,
                name: "weekday mornings".to_string(),
                rule: RecurrenceRule::daily(nine_am()),
                jobs_per_run,
            })
            .await
            .unwrap()
    }

    async fn upload(&self, client_id: ClientId, keywords: &[&str]) -> Vec<WorkItem> {
        let payloads = keywords
            .iter()
            .map(|keyword| {
                let mut row = serde_json::Map::new();
                row.insert("keyword".to_string(), json!(keyword));
                row
            })
            .collect();
        self.work_items
            .insert_batch(client_id, BatchId::new(), payloads)
            .await
            .unwrap()
    }

    async fn count(&self, client_id: ClientId, status: AutomationStatus) -> usize {
        self.work_items
            .list_by_status(client_id, status)
            .await
            .unwrap()
            .len()
    }

    /// Run the ingest queue until every attempt of the current jobs is used up.
    async fn exhaust_ingest_attempts(&self) {
        for _ in 0..QueueName::Ingest.default_policy().attempts {
            self.pool.run_until_idle().await.unwrap();
            self.clock.advance(Duration::hours(1));
        }
    }

    async fn activity_count(&self, kind: ActivityKind) -> usize {
        self.activity
            .all()
            .await
            .iter()
            .filter(|entry| entry.kind == kind)
            .count()
    }
}

fn manual(job_limit: Option<u32>) -> RunTrigger {
    RunTrigger::Manual(ManualRun {
        job_limit,
        only_if_due: false,
    })
}

#[tokio::test]
async fn test_scheduled_run_releases_limit_and_reaches_approval() {
    let h = Harness::new();
    let client = ClientId::new();
    let schedule = h.daily_schedule(client, 2).await;
    assert_eq!(
        schedule.next_run_at,
        Some(Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap())
    );
    h.upload(client, &["a", "b", "c", "d", "e"]).await;

    // Not due yet.
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.due, 0);

    h.clock.set(Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.jobs_enqueued, 2);
    assert_eq!(
        report.outcomes[0].result,
        ExecutionResult::Enqueued { job_count: 2 }
    );
    assert_eq!(
        report.outcomes[0].next_run_at,
        Utc.with_ymd_and_hms(2025, 6, 3, 9, 0, 0).unwrap()
    );

    assert_eq!(h.count(client, AutomationStatus::Pending).await, 3);
    assert_eq!(h.count(client, AutomationStatus::Processing).await, 2);
    assert_eq!(h.broker.jobs(QueueName::Ingest).await.len(), 2);

    let processed = h.pool.run_until_idle().await.unwrap();
    assert_eq!(processed, 2);
    assert_eq!(h.count(client, AutomationStatus::PendingApproval).await, 2);
    assert_eq!(h.count(client, AutomationStatus::Pending).await, 3);
    assert_eq!(h.services.approvals.load(Ordering::SeqCst), 2);
    assert_eq!(h.activity_count(ActivityKind::AutomationCompleted).await, 2);

    let stored = h.schedule_service.get(schedule.id).await.unwrap();
    assert_eq!(stored.last_run_at, Some(h.clock.now()));

    // Same instant again: the schedule already moved on.
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.due, 0);
}

#[tokio::test]
async fn test_failing_step_retries_then_fails_item() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 5).await;
    let items = h.upload(client, &["retry me"]).await;
    h.services.fail_articles.store(true, Ordering::SeqCst);

    let run = h
        .producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    assert_eq!(run.job_count, 1);

    let attempts = QueueName::Ingest.default_policy().attempts as usize;
    for _ in 0..attempts {
        assert_eq!(h.pool.run_until_idle().await.unwrap(), 1);
        h.clock.advance(Duration::hours(1));
    }
    assert_eq!(h.pool.run_until_idle().await.unwrap(), 0);

    assert_eq!(h.services.briefs.load(Ordering::SeqCst), attempts);
    assert_eq!(h.services.articles.load(Ordering::SeqCst), attempts);
    assert_eq!(h.services.approvals.load(Ordering::SeqCst), 0);

    let item = h.work_items.get(items[0].id).await.unwrap();
    assert_eq!(item.status, AutomationStatus::Failed);
    assert_eq!(
        h.activity_count(ActivityKind::AutomationRetrying).await,
        attempts - 1
    );
    assert_eq!(h.activity_count(ActivityKind::AutomationFailed).await, 1);

    let failed = h.broker.list_failed(QueueName::Ingest, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap().contains("article"));
}

#[tokio::test]
async fn test_retrying_exhausted_job_reruns_pipeline() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 5).await;
    let items = h.upload(client, &["second chance"]).await;
    h.services.fail_articles.store(true, Ordering::SeqCst);
    h.producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    h.exhaust_ingest_attempts().await;
    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::Failed
    );

    let failed = h.broker.list_failed(QueueName::Ingest, 10).await.unwrap();
    let job_id = failed[0].id.clone();
    h.services.fail_articles.store(false, Ordering::SeqCst);
    let briefs_before = h.services.briefs.load(Ordering::SeqCst);

    let retried = h.producer.retry_failed_job(&job_id).await.unwrap();
    assert_eq!(retried.state, JobState::Waiting);
    assert_eq!(retried.attempts_made, 0);
    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::Processing
    );

    assert_eq!(h.pool.run_until_idle().await.unwrap(), 1);
    assert_eq!(h.services.briefs.load(Ordering::SeqCst), briefs_before + 1);
    assert_eq!(h.services.approvals.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::PendingApproval
    );
    let job = h.broker.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(h.activity_count(ActivityKind::AutomationCompleted).await, 1);
}

#[tokio::test]
async fn test_retry_refused_once_item_was_reset() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 5).await;
    let items = h.upload(client, &["moved on"]).await;
    h.services.fail_articles.store(true, Ordering::SeqCst);
    h.producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    h.exhaust_ingest_attempts().await;
    let failed = h.broker.list_failed(QueueName::Ingest, 10).await.unwrap();
    let job_id = failed[0].id.clone();

    h.producer.reset_work_item(items[0].id).await.unwrap();
    let err = h.producer.retry_failed_job(&job_id).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    assert_eq!(
        h.broker.get(&job_id).await.unwrap().unwrap().state,
        JobState::Failed
    );
    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::Pending
    );

    let err = h
        .producer
        .retry_failed_job(&JobId::from("no-such-job"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_item_stays_processing_while_retry_is_pending() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 5).await;
    let items = h.upload(client, &["flaky"]).await;
    h.services.fail_articles.store(true, Ordering::SeqCst);

    h.producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    h.pool.run_until_idle().await.unwrap();

    let item = h.work_items.get(items[0].id).await.unwrap();
    assert_eq!(item.status, AutomationStatus::Processing);

    // Backoff not elapsed: nothing to claim.
    assert_eq!(h.pool.run_until_idle().await.unwrap(), 0);

    h.services.fail_articles.store(false, Ordering::SeqCst);
    h.clock.advance(Duration::seconds(2));
    assert_eq!(h.pool.run_until_idle().await.unwrap(), 1);
    let item = h.work_items.get(items[0].id).await.unwrap();
    assert_eq!(item.status, AutomationStatus::PendingApproval);
}

#[tokio::test]
async fn test_concurrent_runs_enqueue_each_item_once() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 10).await;
    h.upload(client, &["a", "b", "c", "d"]).await;

    let (first, second) = tokio::join!(
        h.producer.start_automation(client, manual(None)),
        h.producer.start_automation(client, manual(None)),
    );
    let total = first.unwrap().job_count + second.unwrap().job_count;
    assert_eq!(total, 4);
    assert_eq!(h.broker.jobs(QueueName::Ingest).await.len(), 4);
    assert_eq!(h.count(client, AutomationStatus::Pending).await, 0);
}

#[tokio::test]
async fn test_enqueue_failure_keeps_jobs_already_queued() {
    let clock = Arc::new(ManualClock::new(start()));
    let work_items = Arc::new(MemoryWorkItemRepo::with_clock(clock.clone()));
    let activity = Arc::new(MemoryActivityRepo::with_clock(clock.clone()));
    let broker = Arc::new(FlakyBroker {
        inner: MemoryBroker::with_clock(BrokerConfig::default(), clock.clone()),
        accept: AtomicUsize::new(2),
    });
    let producer = Producer::new(
        work_items.clone(),
        Arc::new(MemoryScheduleRepo::with_clock(clock.clone())),
        activity.clone(),
        broker.clone(),
        clock.clone(),
    );
    let client = ClientId::new();
    let payloads = ["one", "two", "three", "four"]
        .iter()
        .map(|keyword| {
            let mut row = serde_json::Map::new();
            row.insert("keyword".to_string(), json!(keyword));
            row
        })
        .collect();
    work_items
        .insert_batch(client, BatchId::new(), payloads)
        .await
        .unwrap();
    let trigger = RunTrigger::Scheduled {
        schedule_id: ScheduleId::new(),
        jobs_per_run: 4,
    };

    let run = producer.start_automation(client, trigger.clone()).await.unwrap();
    assert!(run.success);
    assert_eq!(run.job_count, 2);
    assert!(run.error.as_deref().unwrap().contains("queue unavailable"));

    let count = |status: AutomationStatus| {
        let work_items = work_items.clone();
        async move { work_items.list_by_status(client, status).await.unwrap().len() }
    };
    assert_eq!(count(AutomationStatus::Processing).await, 2);
    assert_eq!(count(AutomationStatus::Failed).await, 1);
    assert_eq!(count(AutomationStatus::Pending).await, 1);
    assert_eq!(broker.counts(QueueName::Ingest).await.unwrap().waiting, 2);

    let entries = activity.all().await;
    let started = entries
        .iter()
        .find(|entry| entry.kind == ActivityKind::AutomationStarted)
        .unwrap();
    assert_eq!(started.metadata["job_count"], json!(2));
    assert!(started.metadata["error"].is_string());

    // Nothing queued before the failure: the error is the outcome.
    let err = producer.start_automation(client, trigger).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Broker(_)));
    assert_eq!(count(AutomationStatus::Failed).await, 2);
}

#[tokio::test]
async fn test_limit_holds_across_batches() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 10).await;
    let first = h.upload(client, &["a", "b"]).await;
    let second = h.upload(client, &["c", "d", "e"]).await;

    let run = h
        .producer
        .start_automation(client, manual(Some(3)))
        .await
        .unwrap();
    assert!(run.success);
    assert_eq!(run.job_count, 3);
    assert_eq!(run.batch_id, Some(first[0].batch_id));
    assert_eq!(run.batch_ids, vec![first[0].batch_id, second[0].batch_id]);
    assert_eq!(h.count(client, AutomationStatus::Pending).await, 2);

    let progress = h.producer.batch_progress(client).await.unwrap();
    let second_batch = progress
        .iter()
        .find(|p| p.batch_id == second[0].batch_id)
        .unwrap();
    assert_eq!(second_batch.processing, 1);
    assert_eq!(second_batch.pending, 2);
}

#[tokio::test]
async fn test_manual_run_without_schedule_is_refused() {
    let h = Harness::new();
    let client = ClientId::new();
    h.upload(client, &["a"]).await;

    let err = h
        .producer
        .start_automation(client, manual(Some(1)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Core(Error::PolicyMissing(id)) if id == client
    ));
    assert_eq!(err.code(), "NO_SCHEDULE_SET");
    assert_eq!(h.count(client, AutomationStatus::Pending).await, 1);
    assert!(h.broker.jobs(QueueName::Ingest).await.is_empty());
}

#[tokio::test]
async fn test_only_if_due_reports_next_run() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 1).await;
    h.upload(client, &["a"]).await;

    let trigger = RunTrigger::Manual(ManualRun {
        job_limit: None,
        only_if_due: true,
    });
    let err = h
        .producer
        .start_automation(client, trigger.clone())
        .await
        .unwrap_err();
    let SchedulerError::Core(Error::NotDue { next_run_at }) = err else {
        panic!("expected a not-due refusal");
    };
    assert_eq!(
        next_run_at,
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    );

    h.clock.set(next_run_at);
    let run = h.producer.start_automation(client, trigger).await.unwrap();
    assert_eq!(run.job_count, 1);
}

#[tokio::test]
async fn test_no_pending_items_is_not_an_error() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 3).await;

    let run = h
        .producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    assert!(!run.success);
    assert_eq!(run.job_count, 0);
    assert_eq!(run.batch_id, None);

    h.clock.set(Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.outcomes[0].result, ExecutionResult::NoWork);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_resume_recomputes_from_resume_time() {
    let h = Harness::new();
    let client = ClientId::new();
    let schedule = h.daily_schedule(client, 2).await;
    h.upload(client, &["a", "b"]).await;

    let paused = h.schedule_service.pause(schedule.id).await.unwrap();
    assert_eq!(paused.state, ScheduleState::Paused);
    assert_eq!(paused.next_run_at, None);

    // Days pass while paused; nothing runs.
    h.clock.set(Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap());
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.due, 0);

    let resumed = h.schedule_service.resume(schedule.id).await.unwrap();
    assert_eq!(resumed.state, ScheduleState::Active);
    assert_eq!(
        resumed.next_run_at,
        Some(Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap())
    );

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(h.count(client, AutomationStatus::Pending).await, 2);

    let err = h.schedule_service.resume(schedule.id).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}

#[tokio::test]
async fn test_tick_isolates_failing_schedule() {
    let clock = Arc::new(ManualClock::new(start()));
    let broken = ClientId::new();
    let work_items: Arc<dyn WorkItemRepo> = Arc::new(BrokenClientRepo {
        inner: MemoryWorkItemRepo::with_clock(clock.clone()),
        broken,
    });
    let h = Harness::with_work_items(clock, work_items);
    let healthy = ClientId::new();
    h.daily_schedule(broken, 2).await;
    h.daily_schedule(healthy, 2).await;
    h.upload(broken, &["x"]).await;
    h.upload(healthy, &["y"]).await;

    let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
    h.clock.set(now);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.due, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.jobs_enqueued, 1);
    for outcome in &report.outcomes {
        assert!(outcome.next_run_at > now);
    }

    let failed = report
        .outcomes
        .iter()
        .find(|o| o.client_id == broken)
        .unwrap();
    assert!(matches!(failed.result, ExecutionResult::Failed { .. }));
    assert_eq!(h.activity_count(ActivityKind::ScheduleFailed).await, 1);
    assert_eq!(h.activity_count(ActivityKind::ScheduleExecuted).await, 1);

    // The failed schedule is not retried on the next tick at the same instant.
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.due, 0);
}

#[tokio::test]
async fn test_publish_closes_out_work_item() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 1).await;
    let items = h.upload(client, &["launch"]).await;

    h.producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    h.pool.run_until_idle().await.unwrap();
    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::PendingApproval
    );

    let payload = JobPayload::Publish(PublishJob {
        client_id: client,
        work_item_id: Some(items[0].id),
        batch_id: Some(items[0].batch_id),
        article: Article {
            id: "article-1".to_string(),
            title: "Launch day".to_string(),
            content: "body".to_string(),
        },
    });
    h.broker
        .enqueue(JobId::standalone(QueueName::Publish), payload)
        .await
        .unwrap();
    assert_eq!(h.pool.run_until_idle().await.unwrap(), 1);

    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::Done
    );
    assert_eq!(h.services.publishes.load(Ordering::SeqCst), 1);
    assert_eq!(h.activity_count(ActivityKind::ArticlePublished).await, 1);
}

#[tokio::test]
async fn test_reset_failed_item_makes_it_eligible_again() {
    let h = Harness::new();
    let client = ClientId::new();
    h.daily_schedule(client, 5).await;
    let items = h.upload(client, &["again"]).await;

    let err = h.producer.reset_work_item(items[0].id).await.unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    h.services.fail_articles.store(true, Ordering::SeqCst);
    h.producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    for _ in 0..QueueName::Ingest.default_policy().attempts {
        h.pool.run_until_idle().await.unwrap();
        h.clock.advance(Duration::hours(1));
    }
    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::Failed
    );

    let reset = h.producer.reset_work_item(items[0].id).await.unwrap();
    assert_eq!(reset.status, AutomationStatus::Pending);
    assert_eq!(reset.processing_started_at, None);

    h.services.fail_articles.store(false, Ordering::SeqCst);
    let run = h
        .producer
        .start_automation(client, manual(None))
        .await
        .unwrap();
    assert_eq!(run.job_count, 1);
    h.pool.run_until_idle().await.unwrap();
    assert_eq!(
        h.work_items.get(items[0].id).await.unwrap().status,
        AutomationStatus::PendingApproval
    );
}

#[tokio::test]
async fn test_scheduler_start_and_stop_are_idempotent() {
    let h = Harness::new();
    assert!(h.scheduler.start().await);
    assert!(!h.scheduler.start().await);
    assert!(h.scheduler.status().await.running);
    assert!(h.scheduler.stop().await);
    assert!(!h.scheduler.stop().await);
    assert!(!h.scheduler.is_running().await);
}
