//! Collaborator traits and their request/response types.
//!
//! Collaborators are the external services the pipeline drives: brief
//! generation, article generation, approval dispatch and publishing. The
//! pipeline only depends on these traits; HTTP implementations live in
//! `copydesk-services`.

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{ClientId, Result};

/// One of the externally-dependent steps a job can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    #[display("brief")]
    Brief,
    #[display("article")]
    Article,
    #[display("approval")]
    Approval,
    #[display("publish")]
    Publish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefRequest {
    pub keyword: String,
    pub content_type: Option<String>,
    pub audience: Option<String>,
    pub client_id: ClientId,
}

/// A generated content brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    pub id: String,
    pub title: String,
    pub key_points: Vec<String>,
    pub word_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRequest {
    pub title: String,
    pub key_points: Vec<String>,
    pub audience: Option<String>,
    pub word_count: u32,
    pub brief_id: String,
    pub client_id: ClientId,
}

impl ArticleRequest {
    /// Build the article request that follows from a generated brief.
    pub fn from_brief(brief: &Brief, audience: Option<String>, client_id: ClientId) -> Self {
        Self {
            title: brief.title.clone(),
            key_points: brief.key_points.clone(),
            audience,
            word_count: brief.word_count,
            brief_id: brief.id.clone(),
            client_id,
        }
    }
}

/// A generated article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub client_id: ClientId,
    pub article_id: String,
    pub title: String,
    pub content: String,
}

impl ApprovalRequest {
    pub fn for_article(client_id: ClientId, article: &Article) -> Self {
        Self {
            client_id,
            article_id: article.id.clone(),
            title: article.title.clone(),
            content: article.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub client_id: ClientId,
    pub article_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub url: Option<String>,
}

/// Generates a content brief from a keyword.
#[async_trait]
pub trait BriefGenerator: Send + Sync {
    async fn generate_brief(&self, request: &BriefRequest) -> Result<Brief>;
}

/// Generates an article from a brief.
#[async_trait]
pub trait ArticleGenerator: Send + Sync {
    async fn generate_article(&self, request: &ArticleRequest) -> Result<Article>;
}

/// Sends an article to the client for human approval.
///
/// Implementations resolve the client's notification address and render
/// approve / reject / request-changes links back into the system.
#[async_trait]
pub trait ApprovalDispatcher: Send + Sync {
    async fn send_for_approval(&self, request: &ApprovalRequest) -> Result<ApprovalReceipt>;
}

/// Publishes an approved article to the client's site.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt>;
}

/// The full set of collaborators a worker pool needs.
#[derive(Clone)]
pub struct Collaborators {
    pub brief: Arc<dyn BriefGenerator>,
    pub article: Arc<dyn ArticleGenerator>,
    pub approval: Arc<dyn ApprovalDispatcher>,
    pub publisher: Arc<dyn Publisher>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_request_from_brief() {
        let brief = Brief {
            id: "brief-1".to_string(),
            title: "Winter tyre guide".to_string(),
            key_points: vec!["tread depth".to_string(), "storage".to_string()],
            word_count: 1200,
        };
        let client_id = ClientId::new();
        let request = ArticleRequest::from_brief(&brief, Some("drivers".to_string()), client_id);

        assert_eq!(request.brief_id, "brief-1");
        assert_eq!(request.word_count, 1200);
        assert_eq!(request.key_points.len(), 2);
        assert_eq!(request.audience.as_deref(), Some("drivers"));
    }

    #[test]
    fn test_step_display() {
        assert_eq!(PipelineStep::Approval.to_string(), "approval");
    }
}
