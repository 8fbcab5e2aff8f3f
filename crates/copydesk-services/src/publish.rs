//! Publishing approved articles.

use async_trait::async_trait;
use copydesk_core::Result;
use copydesk_core::collaborator::{PipelineStep, PublishReceipt, PublishRequest, Publisher};
use tracing::info;

use crate::http::JsonEndpoint;

/// Calls `POST {base}/publish`.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    endpoint: JsonEndpoint,
}

impl HttpPublisher {
    pub fn new(endpoint: JsonEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt> {
        let receipt: PublishReceipt = self
            .endpoint
            .post("publish", request)
            .await
            .map_err(|e| e.into_step(PipelineStep::Publish))?;
        info!(
            client_id = %request.client_id,
            article_id = %request.article_id,
            url = receipt.url.as_deref().unwrap_or("-"),
            "article published"
        );
        Ok(receipt)
    }
}
