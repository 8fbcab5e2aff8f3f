//! Shared JSON-over-HTTP plumbing.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::{ServiceError, ServiceResult};

/// A collaborator service reachable at a base URL.
#[derive(Debug, Clone)]
pub struct JsonEndpoint {
    client: reqwest::Client,
    base: Url,
}

impl JsonEndpoint {
    /// Paths are resolved relative to `base`, which is treated as a directory.
    pub fn new(client: reqwest::Client, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url(&self, path: &str) -> ServiceResult<Url> {
        Ok(self.base.join(path)?)
    }

    /// POST `body` as JSON and decode a JSON response.
    ///
    /// Non-2xx statuses become [`ServiceError::Api`] with the response text.
    pub async fn post<B, R>(&self, path: &str, body: &B) -> ServiceResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path)?;
        debug!(url = %url, "calling collaborator");

        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ServiceError::Parse(e.to_string()))
    }
}
