//! Schedule commands.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ApiClient, print_json};

/// Recurrence fields as the API expects them.
#[derive(Debug, Serialize)]
pub struct NewRule {
    pub frequency: String,
    pub start_time: String,
    pub interval: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
}

fn print_row(schedule: &Value) {
    println!(
        "{}  {:<8} {:<8} {:>3}/run  next {}  {}",
        schedule["id"].as_str().unwrap_or("-"),
        schedule["state"].as_str().unwrap_or("-"),
        schedule["rule"]["frequency"].as_str().unwrap_or("-"),
        schedule["jobs_per_run"],
        schedule["next_run_at"].as_str().unwrap_or("-"),
        schedule["name"].as_str().unwrap_or("")
    );
}

pub async fn list(api: &ApiClient, client: &str) -> Result<()> {
    let url = api.url(&format!("api/v1/clients/{}/schedules", client))?;
    let schedules = api.get(url).await?;
    let rows = schedules.as_array().cloned().unwrap_or_default();
    if rows.is_empty() {
        println!("No schedules for client {}", client);
    }
    for schedule in &rows {
        print_row(schedule);
    }
    Ok(())
}

pub async fn create(
    api: &ApiClient,
    client: &str,
    name: &str,
    rule: NewRule,
    jobs_per_run: u32,
) -> Result<()> {
    let mut body = serde_json::to_value(&rule)?;
    body["name"] = json!(name);
    body["jobs_per_run"] = json!(jobs_per_run);
    let url = api.url(&format!("api/v1/clients/{}/schedules", client))?;
    let schedule = api.post(url, Some(body)).await?;
    print_json(&schedule)
}

pub async fn pause(api: &ApiClient, id: &str) -> Result<()> {
    let schedule = api
        .post(api.url(&format!("api/v1/schedules/{}/pause", id))?, None)
        .await?;
    print_row(&schedule);
    Ok(())
}

pub async fn resume(api: &ApiClient, id: &str) -> Result<()> {
    let schedule = api
        .post(api.url(&format!("api/v1/schedules/{}/resume", id))?, None)
        .await?;
    print_row(&schedule);
    Ok(())
}

pub async fn delete(api: &ApiClient, id: &str) -> Result<()> {
    api.delete(api.url(&format!("api/v1/schedules/{}", id))?)
        .await?;
    println!("Deleted schedule {}", id);
    Ok(())
}
