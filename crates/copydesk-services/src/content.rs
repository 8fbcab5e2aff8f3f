//! Brief and article generation services.

use async_trait::async_trait;
use copydesk_core::Result;
use copydesk_core::collaborator::{
    Article, ArticleGenerator, ArticleRequest, Brief, BriefGenerator, BriefRequest, PipelineStep,
};
use tracing::info;

use crate::error::ServiceError;
use crate::http::JsonEndpoint;

/// Calls `POST {base}/briefs`.
#[derive(Debug, Clone)]
pub struct HttpBriefGenerator {
    endpoint: JsonEndpoint,
}

impl HttpBriefGenerator {
    pub fn new(endpoint: JsonEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl BriefGenerator for HttpBriefGenerator {
    async fn generate_brief(&self, request: &BriefRequest) -> Result<Brief> {
        let brief: Brief = self
            .endpoint
            .post("briefs", request)
            .await
            .map_err(|e| e.into_step(PipelineStep::Brief))?;
        if brief.title.trim().is_empty() {
            return Err(ServiceError::Parse("brief has no title".to_string())
                .into_step(PipelineStep::Brief));
        }
        info!(
            client_id = %request.client_id,
            keyword = %request.keyword,
            brief_id = %brief.id,
            "brief generated"
        );
        Ok(brief)
    }
}

/// Calls `POST {base}/articles`.
#[derive(Debug, Clone)]
pub struct HttpArticleGenerator {
    endpoint: JsonEndpoint,
}

impl HttpArticleGenerator {
    pub fn new(endpoint: JsonEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ArticleGenerator for HttpArticleGenerator {
    async fn generate_article(&self, request: &ArticleRequest) -> Result<Article> {
        let article: Article = self
            .endpoint
            .post("articles", request)
            .await
            .map_err(|e| e.into_step(PipelineStep::Article))?;
        if article.content.trim().is_empty() {
            return Err(ServiceError::Parse("article has no content".to_string())
                .into_step(PipelineStep::Article));
        }
        info!(
            client_id = %request.client_id,
            brief_id = %request.brief_id,
            article_id = %article.id,
            "article generated"
        );
        Ok(article)
    }
}
