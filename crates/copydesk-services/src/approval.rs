//! Approval dispatch: hands an article to the notification service along
//! with the links a reviewer uses to answer.

use async_trait::async_trait;
use copydesk_core::Result;
use copydesk_core::collaborator::{
    ApprovalDispatcher, ApprovalReceipt, ApprovalRequest, PipelineStep,
};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::error::{ServiceError, ServiceResult};
use crate::http::JsonEndpoint;

/// Reviewer links for one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalLinks {
    pub approve: Url,
    pub reject: Url,
    pub request_changes: Url,
}

impl ApprovalLinks {
    /// `{base}/approvals/{article_id}/{action}` for each action.
    pub fn for_article(base: &Url, article_id: &str) -> ServiceResult<Self> {
        Ok(Self {
            approve: action_link(base, article_id, "approve")?,
            reject: action_link(base, article_id, "reject")?,
            request_changes: action_link(base, article_id, "request-changes")?,
        })
    }
}

fn action_link(base: &Url, article_id: &str, action: &str) -> ServiceResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ServiceError::InvalidBase(base.to_string()))?
        .pop_if_empty()
        .extend(["approvals", article_id, action]);
    Ok(url)
}

#[derive(Serialize)]
struct ApprovalMessage<'a> {
    #[serde(flatten)]
    request: &'a ApprovalRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    links: Option<ApprovalLinks>,
}

/// Calls `POST {base}/approvals`.
#[derive(Debug, Clone)]
pub struct HttpApprovalDispatcher {
    endpoint: JsonEndpoint,
    links_base: Option<Url>,
}

impl HttpApprovalDispatcher {
    pub fn new(endpoint: JsonEndpoint, links_base: Option<Url>) -> Self {
        Self {
            endpoint,
            links_base,
        }
    }
}

#[async_trait]
impl ApprovalDispatcher for HttpApprovalDispatcher {
    async fn send_for_approval(&self, request: &ApprovalRequest) -> Result<ApprovalReceipt> {
        let links = self
            .links_base
            .as_ref()
            .map(|base| ApprovalLinks::for_article(base, &request.article_id))
            .transpose()
            .map_err(|e| e.into_step(PipelineStep::Approval))?;
        let message = ApprovalMessage { request, links };

        let receipt: ApprovalReceipt = self
            .endpoint
            .post("approvals", &message)
            .await
            .map_err(|e| e.into_step(PipelineStep::Approval))?;
        info!(
            client_id = %request.client_id,
            article_id = %request.article_id,
            accepted = receipt.success,
            "approval requested"
        );
        Ok(receipt)
    }
}
