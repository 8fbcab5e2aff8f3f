//! CLI command implementations.

pub mod queues;
pub mod run;
pub mod scheduler;
pub mod schedules;

use anyhow::{Context, Result, bail};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Thin JSON client for the operator API.
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base =
            Url::parse(api_url).with_context(|| format!("invalid API URL: {}", api_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    /// Resolve an API path such as `api/v1/queues`.
    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    pub async fn get(&self, url: Url) -> Result<Value> {
        self.send(Method::GET, url, None).await
    }

    pub async fn post(&self, url: Url, body: Option<Value>) -> Result<Value> {
        self.send(Method::POST, url, body).await
    }

    pub async fn put(&self, url: Url, body: Value) -> Result<Value> {
        self.send(Method::PUT, url, Some(body)).await
    }

    pub async fn delete(&self, url: Url) -> Result<Value> {
        self.send(Method::DELETE, url, None).await
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value> {
        debug!(method = %method, url = %url, "api request");
        let mut request = self
            .client
            .request(method, url.clone())
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            bail!("{}", error_message(status, &text));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("invalid JSON in response")
    }
}

/// Prefer the API's `{"error", "code"}` body over the raw text.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match (value["error"].as_str(), value["code"].as_str()) {
            (Some(error), Some(code)) => format!("{} [{}] ({})", error, code, status),
            (Some(error), None) => format!("{} ({})", error, status),
            _ => format!("request failed ({}): {}", status, body),
        },
        Err(_) => format!("request failed ({}): {}", status, body),
    }
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn activity(api: &ApiClient, client: Option<&str>, limit: u32) -> Result<()> {
    let mut url = api.url("api/v1/activity")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("limit", &limit.to_string());
        if let Some(client) = client {
            query.append_pair("client_id", client);
        }
    }
    let entries = api.get(url).await?;
    for entry in entries.as_array().into_iter().flatten() {
        println!(
            "{}  {:<20}  {}",
            entry["created_at"].as_str().unwrap_or("-"),
            entry["kind"].as_str().unwrap_or("-"),
            entry["title"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

pub fn validate_config(path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path))?;
    match copydesk_config::parse_system_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen:    {}", config.server.listen);
            println!("  timezone:  {}", config.scheduler.timezone);
            println!("  tick:      {}s", config.scheduler.tick.as_secs());
            for (queue, policy) in &config.queues {
                println!(
                    "  queue {:<9} priority={} attempts={} backoff={}ms",
                    queue.as_str(),
                    policy.priority,
                    policy.attempts,
                    policy.backoff_base.as_millis()
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
