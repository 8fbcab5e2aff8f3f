//! Queue names, retry policies and job payloads.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::collaborator::{Article, Brief, BriefRequest, PipelineStep};
use crate::{BatchId, ClientId, Error, Result, WorkItemId};

/// Upper bound on any single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// The five broker queues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Drives the full per-item pipeline.
    #[display("ingest")]
    Ingest,
    #[display("brief")]
    Brief,
    #[display("article")]
    Article,
    #[display("approval")]
    Approval,
    #[display("publish")]
    Publish,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::Ingest,
        QueueName::Brief,
        QueueName::Article,
        QueueName::Approval,
        QueueName::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Ingest => "ingest",
            QueueName::Brief => "brief",
            QueueName::Article => "article",
            QueueName::Approval => "approval",
            QueueName::Publish => "publish",
        }
    }

    /// Built-in priority, attempt cap and backoff for this queue.
    pub fn default_policy(&self) -> QueuePolicy {
        let (priority, attempts, base_secs) = match self {
            QueueName::Ingest => (1, 3, 2),
            QueueName::Brief => (2, 2, 3),
            QueueName::Article => (3, 2, 5),
            QueueName::Approval => (4, 2, 2),
            QueueName::Publish => (5, 3, 5),
        };
        QueuePolicy {
            priority,
            attempts,
            backoff_base: Duration::from_secs(base_secs),
        }
    }
}

impl std::str::FromStr for QueueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown queue: {}", s)))
    }
}

/// Retry policy for one queue. Lower priority numbers are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePolicy {
    pub priority: i32,
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Exponential backoff base delay.
    pub backoff_base: Duration,
}

impl QueuePolicy {
    /// Delay before the next attempt after `attempts_made` failed attempts.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(2u32.pow(exponent))
            .min(MAX_BACKOFF)
    }
}

/// Broker-level job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// Identifier for an ingest job, embedding the work item and creation time so
    /// a repeated submission of the same item at the same instant collides.
    pub fn for_work_item(work_item_id: WorkItemId, created_at: DateTime<Utc>) -> Self {
        Self(format!(
            "item-{}-{}",
            work_item_id,
            created_at.timestamp_millis()
        ))
    }

    /// Identifier for a standalone job on `queue`.
    pub fn standalone(queue: QueueName) -> Self {
        Self(format!("{}-{}", queue, uuid::Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Drive one work item through brief, article and approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    pub client_id: ClientId,
    pub work_item_id: WorkItemId,
    pub batch_id: BatchId,
    pub keyword: String,
    pub content_type: Option<String>,
    pub audience: Option<String>,
}

impl IngestJob {
    pub fn new(work_item_id: WorkItemId, batch_id: BatchId, brief: BriefRequest) -> Self {
        Self {
            client_id: brief.client_id,
            work_item_id,
            batch_id,
            keyword: brief.keyword,
            content_type: brief.content_type,
            audience: brief.audience,
        }
    }

    pub fn brief_request(&self) -> BriefRequest {
        BriefRequest {
            keyword: self.keyword.clone(),
            content_type: self.content_type.clone(),
            audience: self.audience.clone(),
            client_id: self.client_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefJob {
    pub client_id: ClientId,
    pub work_item_id: Option<WorkItemId>,
    pub batch_id: Option<BatchId>,
    pub keyword: String,
    pub content_type: Option<String>,
    pub audience: Option<String>,
}

impl BriefJob {
    pub fn brief_request(&self) -> BriefRequest {
        BriefRequest {
            keyword: self.keyword.clone(),
            content_type: self.content_type.clone(),
            audience: self.audience.clone(),
            client_id: self.client_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleJob {
    pub client_id: ClientId,
    pub work_item_id: Option<WorkItemId>,
    pub batch_id: Option<BatchId>,
    pub brief: Brief,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalJob {
    pub client_id: ClientId,
    pub work_item_id: Option<WorkItemId>,
    pub batch_id: Option<BatchId>,
    pub article: Article,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishJob {
    pub client_id: ClientId,
    pub work_item_id: Option<WorkItemId>,
    pub batch_id: Option<BatchId>,
    pub article: Article,
}

/// Queued unit of work; one shape per queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Ingest(IngestJob),
    Brief(BriefJob),
    Article(ArticleJob),
    Approval(ApprovalJob),
    Publish(PublishJob),
}

impl JobPayload {
    /// The queue this payload belongs on.
    pub fn queue(&self) -> QueueName {
        match self {
            JobPayload::Ingest(_) => QueueName::Ingest,
            JobPayload::Brief(_) => QueueName::Brief,
            JobPayload::Article(_) => QueueName::Article,
            JobPayload::Approval(_) => QueueName::Approval,
            JobPayload::Publish(_) => QueueName::Publish,
        }
    }

    pub fn client_id(&self) -> ClientId {
        match self {
            JobPayload::Ingest(job) => job.client_id,
            JobPayload::Brief(job) => job.client_id,
            JobPayload::Article(job) => job.client_id,
            JobPayload::Approval(job) => job.client_id,
            JobPayload::Publish(job) => job.client_id,
        }
    }

    pub fn work_item_id(&self) -> Option<WorkItemId> {
        match self {
            JobPayload::Ingest(job) => Some(job.work_item_id),
            JobPayload::Brief(job) => job.work_item_id,
            JobPayload::Article(job) => job.work_item_id,
            JobPayload::Approval(job) => job.work_item_id,
            JobPayload::Publish(job) => job.work_item_id,
        }
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            JobPayload::Ingest(job) => Some(job.batch_id),
            JobPayload::Brief(job) => job.batch_id,
            JobPayload::Article(job) => job.batch_id,
            JobPayload::Approval(job) => job.batch_id,
            JobPayload::Publish(job) => job.batch_id,
        }
    }

    /// The first external step this payload performs.
    pub fn first_step(&self) -> PipelineStep {
        match self {
            JobPayload::Ingest(_) | JobPayload::Brief(_) => PipelineStep::Brief,
            JobPayload::Article(_) => PipelineStep::Article,
            JobPayload::Approval(_) => PipelineStep::Approval,
            JobPayload::Publish(_) => PipelineStep::Publish,
        }
    }
}
