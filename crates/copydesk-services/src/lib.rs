//! HTTP collaborator clients for the Copydesk content pipeline.
//!
//! Each collaborator is a JSON service at a configured base URL:
//!
//! | Collaborator | Request |
//! |---|---|
//! | brief | `POST {brief}/briefs` |
//! | article | `POST {article}/articles` |
//! | approval | `POST {approval}/approvals` |
//! | publish | `POST {publish}/publish` |
//!
//! Failures of any kind surface as a step failure of the calling step.

pub mod approval;
pub mod content;
pub mod error;
pub mod http;
pub mod publish;

pub use approval::{ApprovalLinks, HttpApprovalDispatcher};
pub use content::{HttpArticleGenerator, HttpBriefGenerator};
pub use error::{ServiceError, ServiceResult};
pub use http::JsonEndpoint;
pub use publish::HttpPublisher;

use copydesk_config::ServicesConfig;
use copydesk_core::collaborator::Collaborators;
use std::sync::Arc;
use url::Url;

const USER_AGENT: &str = concat!("copydesk/", env!("CARGO_PKG_VERSION"));

fn required<'a>(url: &'a Option<Url>, name: &'static str) -> ServiceResult<&'a Url> {
    url.as_ref().ok_or(ServiceError::NotConfigured(name))
}

/// Build every collaborator from configured endpoints, sharing one HTTP client.
pub fn collaborators_from_config(config: &ServicesConfig) -> ServiceResult<Collaborators> {
    let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
    let endpoint = |url: &Url| JsonEndpoint::new(client.clone(), url.clone());

    Ok(Collaborators {
        brief: Arc::new(HttpBriefGenerator::new(endpoint(required(
            &config.brief,
            "brief",
        )?))),
        article: Arc::new(HttpArticleGenerator::new(endpoint(required(
            &config.article,
            "article",
        )?))),
        approval: Arc::new(HttpApprovalDispatcher::new(
            endpoint(required(&config.approval, "approval")?),
            config.approval_links.clone(),
        )),
        publisher: Arc::new(HttpPublisher::new(endpoint(required(
            &config.publish,
            "publish",
        )?))),
    })
}
