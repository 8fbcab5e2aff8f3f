//! Collaborator client errors.

use copydesk_core::collaborator::PipelineStep;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} endpoint is not configured")]
    NotConfigured(&'static str),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0} cannot be used as a base url")]
    InvalidBase(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl ServiceError {
    /// Surface as a failure of the pipeline step that made the call.
    pub fn into_step(self, step: PipelineStep) -> copydesk_core::Error {
        copydesk_core::Error::step(step, self.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
