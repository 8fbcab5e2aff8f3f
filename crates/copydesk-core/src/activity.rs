//! Activity log records.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{ActivityId, BatchId, ClientId, Error, Result, ScheduleId, WorkItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[display("automation_started")]
    AutomationStarted,
    #[display("automation_completed")]
    AutomationCompleted,
    #[display("automation_retrying")]
    AutomationRetrying,
    #[display("automation_failed")]
    AutomationFailed,
    #[display("schedule_executed")]
    ScheduleExecuted,
    #[display("schedule_failed")]
    ScheduleFailed,
    #[display("brief_generated")]
    BriefGenerated,
    #[display("article_generated")]
    ArticleGenerated,
    #[display("approval_requested")]
    ApprovalRequested,
    #[display("article_published")]
    ArticlePublished,
    #[display("work_item_reset")]
    WorkItemReset,
}

impl ActivityKind {
    const ALL: [ActivityKind; 11] = [
        ActivityKind::AutomationStarted,
        ActivityKind::AutomationCompleted,
        ActivityKind::AutomationRetrying,
        ActivityKind::AutomationFailed,
        ActivityKind::ScheduleExecuted,
        ActivityKind::ScheduleFailed,
        ActivityKind::BriefGenerated,
        ActivityKind::ArticleGenerated,
        ActivityKind::ApprovalRequested,
        ActivityKind::ArticlePublished,
        ActivityKind::WorkItemReset,
    ];

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ActivityKind::AutomationFailed | ActivityKind::ScheduleFailed
        )
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ActivityKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown activity kind: {}", s)))
    }
}

/// Entities an activity entry refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRefs {
    pub client_id: Option<ClientId>,
    pub work_item_id: Option<WorkItemId>,
    pub batch_id: Option<BatchId>,
    pub schedule_id: Option<ScheduleId>,
    pub job_id: Option<String>,
}

impl ActivityRefs {
    pub fn client(client_id: ClientId) -> Self {
        Self {
            client_id: Some(client_id),
            ..Default::default()
        }
    }

    pub fn with_work_item(mut self, work_item_id: WorkItemId) -> Self {
        self.work_item_id = Some(work_item_id);
        self
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_schedule(mut self, schedule_id: ScheduleId) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// An activity entry waiting to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub refs: ActivityRefs,
    pub metadata: serde_json::Value,
}

impl NewActivity {
    pub fn new(kind: ActivityKind, title: impl Into<String>, refs: ActivityRefs) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            refs,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A stored activity entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: ActivityId,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub refs: ActivityRefs,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
