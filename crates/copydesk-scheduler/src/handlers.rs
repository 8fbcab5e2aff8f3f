//! Job handlers for the five queues.
//!
//! The ingest handler drives one work item through brief, article and
//! approval as a single unit: any step failing aborts the remaining steps and
//! the whole job is retried by the broker. The standalone handlers run one
//! step each.

use async_trait::async_trait;
use copydesk_config::StepTimeouts;
use copydesk_core::activity::{ActivityKind, ActivityRefs, NewActivity};
use copydesk_core::collaborator::{
    ApprovalRequest, ArticleRequest, Collaborators, PipelineStep, PublishRequest,
};
use copydesk_core::job::{JobPayload, QueueName};
use copydesk_core::work_item::AutomationStatus;
use copydesk_core::{Error, Result, WorkItemId};
use copydesk_db::{ActivityRepo, WorkItemRepo};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::{FailOutcome, QueuedJob};
use crate::record_activity;
use crate::worker::JobHandler;

/// Everything the handlers read or write.
#[derive(Clone)]
pub struct PipelineDeps {
    pub work_items: Arc<dyn WorkItemRepo>,
    pub activity: Arc<dyn ActivityRepo>,
    pub collaborators: Collaborators,
    pub timeouts: StepTimeouts,
}

impl PipelineDeps {
    fn timeout(&self, step: PipelineStep) -> Duration {
        match step {
            PipelineStep::Brief => self.timeouts.brief,
            PipelineStep::Article => self.timeouts.article,
            PipelineStep::Approval => self.timeouts.approval,
            PipelineStep::Publish => self.timeouts.publish,
        }
    }

    /// Run one collaborator call under its step timeout.
    ///
    /// Timeouts and collaborator errors both surface as a step failure.
    async fn call<T, F>(&self, step: PipelineStep, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let limit = self.timeout(step);
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err @ Error::StepFailure { .. })) => Err(err),
            Ok(Err(err)) => Err(Error::step(step, err.to_string())),
            Err(_) => Err(Error::step(
                step,
                format!("timed out after {}s", limit.as_secs()),
            )),
        }
    }

    async fn record(&self, activity: NewActivity) {
        record_activity(self.activity.as_ref(), activity).await;
    }

    /// Default failure bookkeeping for a job: an activity entry per attempt,
    /// and for work-item jobs the terminal `failed` status once exhausted.
    async fn job_failed(&self, job: &QueuedJob, error: &Error, outcome: &FailOutcome) {
        let refs = refs_for(job);
        let step = job.payload.first_step();
        match outcome {
            FailOutcome::Retrying {
                attempts_made,
                run_at,
            } => {
                self.record(
                    NewActivity::new(
                        ActivityKind::AutomationRetrying,
                        format!("Retrying {} job", job.queue),
                        refs,
                    )
                    .description(error.to_string())
                    .metadata(json!({
                        "attempts": attempts_made,
                        "max_attempts": job.max_attempts,
                        "retry_at": run_at,
                        "step": step,
                    })),
                )
                .await;
            }
            FailOutcome::Exhausted { attempts_made } => {
                if let Some(work_item_id) = job.payload.work_item_id() {
                    self.fail_work_item(work_item_id).await;
                }
                self.record(
                    NewActivity::new(
                        ActivityKind::AutomationFailed,
                        format!("{} job failed", capitalize(job.queue.as_str())),
                        refs,
                    )
                    .description(error.to_string())
                    .metadata(json!({
                        "attempts": attempts_made,
                        "error": error.to_string(),
                        "code": error.code(),
                    })),
                )
                .await;
            }
        }
    }

    async fn fail_work_item(&self, id: WorkItemId) {
        match self
            .work_items
            .transition(id, AutomationStatus::Processing, AutomationStatus::Failed)
            .await
        {
            Ok(true) => info!(work_item_id = %id, "work item failed"),
            Ok(false) => debug!(work_item_id = %id, "work item no longer processing"),
            Err(e) => warn!(work_item_id = %id, error = %e, "failed to mark work item failed"),
        }
    }
}

fn refs_for(job: &QueuedJob) -> ActivityRefs {
    let mut refs = ActivityRefs::client(job.payload.client_id()).with_job(job.id.as_str());
    refs.work_item_id = job.payload.work_item_id();
    refs.batch_id = job.payload.batch_id();
    refs
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn unexpected(job: &QueuedJob) -> Error {
    Error::InvalidInput(format!(
        "job {} on {} queue carries a {} payload",
        job.id,
        job.queue,
        job.payload.queue()
    ))
}

/// Drives one work item through brief, article and approval.
pub struct IngestHandler {
    deps: Arc<PipelineDeps>,
}

impl IngestHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for IngestHandler {
    fn queue(&self) -> QueueName {
        QueueName::Ingest
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::Ingest(ingest) = &job.payload else {
            return Err(unexpected(job));
        };
        let deps = &self.deps;

        let item = deps
            .work_items
            .get(ingest.work_item_id)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        if item.status != AutomationStatus::Processing {
            // Reset or finished by someone else since it was enqueued.
            info!(
                job_id = %job.id,
                work_item_id = %item.id,
                status = %item.status,
                "work item is not processing, skipping"
            );
            return Ok(());
        }

        let brief_request = ingest.brief_request();
        let brief = deps
            .call(
                PipelineStep::Brief,
                deps.collaborators.brief.generate_brief(&brief_request),
            )
            .await?;
        debug!(job_id = %job.id, brief_id = %brief.id, "brief generated");

        let article_request =
            ArticleRequest::from_brief(&brief, ingest.audience.clone(), ingest.client_id);
        let article = deps
            .call(
                PipelineStep::Article,
                deps.collaborators.article.generate_article(&article_request),
            )
            .await?;
        debug!(job_id = %job.id, article_id = %article.id, "article generated");

        let approval_request = ApprovalRequest::for_article(ingest.client_id, &article);
        let receipt = deps
            .call(
                PipelineStep::Approval,
                deps.collaborators
                    .approval
                    .send_for_approval(&approval_request),
            )
            .await?;
        if !receipt.success {
            return Err(Error::step(
                PipelineStep::Approval,
                "approval dispatch was not accepted",
            ));
        }

        let moved = deps
            .work_items
            .transition(
                ingest.work_item_id,
                AutomationStatus::Processing,
                AutomationStatus::PendingApproval,
            )
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        if !moved {
            warn!(
                work_item_id = %ingest.work_item_id,
                "work item left processing during the pipeline"
            );
        }

        deps.record(
            NewActivity::new(
                ActivityKind::AutomationCompleted,
                format!("Article ready for approval: {}", article.title),
                refs_for(job),
            )
            .description(format!("Generated from keyword \"{}\"", ingest.keyword))
            .metadata(json!({
                "brief_id": brief.id,
                "article_id": article.id,
                "word_count": brief.word_count,
            })),
        )
        .await;
        Ok(())
    }

    async fn on_failure(&self, job: &QueuedJob, error: &Error, outcome: &FailOutcome) {
        self.deps.job_failed(job, error, outcome).await;
    }
}

/// Standalone brief generation.
pub struct BriefHandler {
    deps: Arc<PipelineDeps>,
}

impl BriefHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for BriefHandler {
    fn queue(&self) -> QueueName {
        QueueName::Brief
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::Brief(payload) = &job.payload else {
            return Err(unexpected(job));
        };
        let request = payload.brief_request();
        let brief = self
            .deps
            .call(
                PipelineStep::Brief,
                self.deps.collaborators.brief.generate_brief(&request),
            )
            .await?;
        self.deps
            .record(
                NewActivity::new(
                    ActivityKind::BriefGenerated,
                    format!("Brief generated: {}", brief.title),
                    refs_for(job),
                )
                .metadata(json!({ "brief": brief })),
            )
            .await;
        Ok(())
    }

    async fn on_failure(&self, job: &QueuedJob, error: &Error, outcome: &FailOutcome) {
        self.deps.job_failed(job, error, outcome).await;
    }
}

/// Standalone article generation from an existing brief.
pub struct ArticleHandler {
    deps: Arc<PipelineDeps>,
}

impl ArticleHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for ArticleHandler {
    fn queue(&self) -> QueueName {
        QueueName::Article
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::Article(payload) = &job.payload else {
            return Err(unexpected(job));
        };
        let request =
            ArticleRequest::from_brief(&payload.brief, payload.audience.clone(), payload.client_id);
        let article = self
            .deps
            .call(
                PipelineStep::Article,
                self.deps.collaborators.article.generate_article(&request),
            )
            .await?;
        self.deps
            .record(
                NewActivity::new(
                    ActivityKind::ArticleGenerated,
                    format!("Article generated: {}", article.title),
                    refs_for(job),
                )
                .metadata(json!({ "article_id": article.id, "brief_id": payload.brief.id })),
            )
            .await;
        Ok(())
    }

    async fn on_failure(&self, job: &QueuedJob, error: &Error, outcome: &FailOutcome) {
        self.deps.job_failed(job, error, outcome).await;
    }
}

/// Standalone approval dispatch.
pub struct ApprovalHandler {
    deps: Arc<PipelineDeps>,
}

impl ApprovalHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for ApprovalHandler {
    fn queue(&self) -> QueueName {
        QueueName::Approval
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::Approval(payload) = &job.payload else {
            return Err(unexpected(job));
        };
        let request = ApprovalRequest::for_article(payload.client_id, &payload.article);
        let receipt = self
            .deps
            .call(
                PipelineStep::Approval,
                self.deps.collaborators.approval.send_for_approval(&request),
            )
            .await?;
        if !receipt.success {
            return Err(Error::step(
                PipelineStep::Approval,
                "approval dispatch was not accepted",
            ));
        }
        self.deps
            .record(
                NewActivity::new(
                    ActivityKind::ApprovalRequested,
                    format!("Approval requested: {}", payload.article.title),
                    refs_for(job),
                )
                .metadata(json!({ "article_id": payload.article.id })),
            )
            .await;
        Ok(())
    }

    async fn on_failure(&self, job: &QueuedJob, error: &Error, outcome: &FailOutcome) {
        self.deps.job_failed(job, error, outcome).await;
    }
}

/// Publishes an approved article and closes out its work item.
pub struct PublishHandler {
    deps: Arc<PipelineDeps>,
}

impl PublishHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for PublishHandler {
    fn queue(&self) -> QueueName {
        QueueName::Publish
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::Publish(payload) = &job.payload else {
            return Err(unexpected(job));
        };
        let request = PublishRequest {
            client_id: payload.client_id,
            article_id: payload.article.id.clone(),
            title: payload.article.title.clone(),
            content: payload.article.content.clone(),
        };
        let receipt = self
            .deps
            .call(
                PipelineStep::Publish,
                self.deps.collaborators.publisher.publish(&request),
            )
            .await?;

        if let Some(work_item_id) = payload.work_item_id {
            let done = self
                .deps
                .work_items
                .transition(
                    work_item_id,
                    AutomationStatus::PendingApproval,
                    AutomationStatus::Done,
                )
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            if !done {
                debug!(work_item_id = %work_item_id, "work item was not awaiting approval");
            }
        }

        self.deps
            .record(
                NewActivity::new(
                    ActivityKind::ArticlePublished,
                    format!("Article published: {}", payload.article.title),
                    refs_for(job),
                )
                .metadata(json!({ "article_id": payload.article.id, "url": receipt.url })),
            )
            .await;
        Ok(())
    }

    async fn on_failure(&self, job: &QueuedJob, error: &Error, outcome: &FailOutcome) {
        self.deps.job_failed(job, error, outcome).await;
    }
}
