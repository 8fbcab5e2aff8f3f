//! Work items and their automation status.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::collaborator::BriefRequest;
use crate::{BatchId, ClientId, Error, Result, WorkItemId};

/// Where a work item is in the automation pipeline.
///
/// Transitions are monotonic: `pending → processing → {pending_approval | failed}`,
/// with `pending_approval → done` once a human approves. Nothing moves back to
/// `pending` automatically; that is an explicit operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    #[display("pending")]
    Pending,
    #[display("processing")]
    Processing,
    #[display("pending_approval")]
    PendingApproval,
    #[display("done")]
    Done,
    #[display("failed")]
    Failed,
}

impl AutomationStatus {
    pub const ALL: [AutomationStatus; 5] = [
        AutomationStatus::Pending,
        AutomationStatus::Processing,
        AutomationStatus::PendingApproval,
        AutomationStatus::Done,
        AutomationStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationStatus::Pending => "pending",
            AutomationStatus::Processing => "processing",
            AutomationStatus::PendingApproval => "pending_approval",
            AutomationStatus::Done => "done",
            AutomationStatus::Failed => "failed",
        }
    }

    /// Whether the pipeline may move an item from `self` to `next`.
    pub fn can_transition_to(self, next: AutomationStatus) -> bool {
        matches!(
            (self, next),
            (AutomationStatus::Pending, AutomationStatus::Processing)
                | (AutomationStatus::Processing, AutomationStatus::PendingApproval)
                | (AutomationStatus::Processing, AutomationStatus::Failed)
                | (AutomationStatus::PendingApproval, AutomationStatus::Done)
        )
    }
}

impl std::str::FromStr for AutomationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AutomationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown automation status: {}", s)))
    }
}

/// One unit of client-supplied input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub client_id: ClientId,
    pub batch_id: BatchId,
    /// Arbitrary uploaded columns. Must contain a keyword.
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub status: AutomationStatus,
    /// Set when the item enters `processing`, cleared by a manual reset.
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const KEYWORD_KEYS: &[&str] = &["keyword", "keywords", "focus keyword"];
const CONTENT_TYPE_KEYS: &[&str] = &["content_type", "contenttype", "content type", "type"];
const AUDIENCE_KEYS: &[&str] = &["audience", "target_audience", "target audience"];

impl WorkItem {
    pub fn keyword(&self) -> Option<&str> {
        self.field(KEYWORD_KEYS)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.field(CONTENT_TYPE_KEYS)
    }

    pub fn audience(&self) -> Option<&str> {
        self.field(AUDIENCE_KEYS)
    }

    /// Build the brief request for this item, failing if no keyword was uploaded.
    pub fn brief_request(&self) -> Result<BriefRequest> {
        let keyword = self.keyword().ok_or_else(|| {
            Error::InvalidInput(format!("work item {} has no keyword", self.id))
        })?;
        Ok(BriefRequest {
            keyword: keyword.to_string(),
            content_type: self.content_type().map(str::to_string),
            audience: self.audience().map(str::to_string),
            client_id: self.client_id,
        })
    }

    /// Look up the first non-empty string value among `keys`, ignoring key case.
    fn field(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|wanted| {
            self.payload
                .iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(wanted))
                .and_then(|(_, value)| value.as_str())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
    }
}

/// Per-batch status counts for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub pending_approval: u64,
    pub done: u64,
    pub failed: u64,
}

impl BatchProgress {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            total: 0,
            pending: 0,
            processing: 0,
            pending_approval: 0,
            done: 0,
            failed: 0,
        }
    }

    pub fn add(&mut self, status: AutomationStatus, count: u64) {
        self.total += count;
        match status {
            AutomationStatus::Pending => self.pending += count,
            AutomationStatus::Processing => self.processing += count,
            AutomationStatus::PendingApproval => self.pending_approval += count,
            AutomationStatus::Done => self.done += count,
            AutomationStatus::Failed => self.failed += count,
        }
    }
}
