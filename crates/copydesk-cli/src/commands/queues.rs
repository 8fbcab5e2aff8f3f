//! Queue and job commands.

use anyhow::Result;
use serde_json::Value;

use super::ApiClient;

fn print_header() {
    println!(
        "{:<9} {:>7} {:>6} {:>7} {:>9} {:>6}  {:<8} HEALTH",
        "QUEUE", "WAITING", "ACTIVE", "DELAYED", "COMPLETED", "FAILED", "PAUSED"
    );
}

fn print_row(queue: &Value) {
    println!(
        "{:<9} {:>7} {:>6} {:>7} {:>9} {:>6}  {:<8} {}",
        queue["queue"].as_str().unwrap_or("-"),
        queue["waiting"],
        queue["active"],
        queue["delayed"],
        queue["completed"],
        queue["failed"],
        queue["paused"].as_bool().unwrap_or(false),
        queue["health"].as_str().unwrap_or("-")
    );
}

pub async fn list(api: &ApiClient) -> Result<()> {
    let queues = api.get(api.url("api/v1/queues")?).await?;
    print_header();
    for queue in queues.as_array().into_iter().flatten() {
        print_row(queue);
    }
    Ok(())
}

pub async fn show(api: &ApiClient, queue: &str) -> Result<()> {
    let status = api.get(api.url(&format!("api/v1/queues/{}", queue))?).await?;
    print_header();
    print_row(&status);
    Ok(())
}

pub async fn pause(api: &ApiClient, queue: &str) -> Result<()> {
    let status = api
        .post(api.url(&format!("api/v1/queues/{}/pause", queue))?, None)
        .await?;
    print_header();
    print_row(&status);
    Ok(())
}

pub async fn resume(api: &ApiClient, queue: &str) -> Result<()> {
    let status = api
        .post(api.url(&format!("api/v1/queues/{}/resume", queue))?, None)
        .await?;
    print_header();
    print_row(&status);
    Ok(())
}

pub async fn drain(api: &ApiClient, queue: &str) -> Result<()> {
    let result = api
        .post(api.url(&format!("api/v1/queues/{}/drain", queue))?, None)
        .await?;
    println!("Removed {} jobs from {}", result["removed"], queue);
    Ok(())
}

pub async fn failed(api: &ApiClient, queue: &str, limit: u32) -> Result<()> {
    let mut url = api.url(&format!("api/v1/queues/{}/failed", queue))?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    let jobs = api.get(url).await?;
    let jobs = jobs.as_array().cloned().unwrap_or_default();
    if jobs.is_empty() {
        println!("No failed jobs on {}", queue);
    }
    for job in &jobs {
        println!(
            "{}  attempts {}/{}  {}",
            job["id"].as_str().unwrap_or("-"),
            job["attempts_made"],
            job["max_attempts"],
            job["error"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn retry_job(api: &ApiClient, id: &str) -> Result<()> {
    let job = api
        .post(api.url(&format!("api/v1/jobs/{}/retry", id))?, None)
        .await?;
    println!(
        "Job {} is {}",
        id,
        job["state"].as_str().unwrap_or("-")
    );
    Ok(())
}

pub async fn remove_job(api: &ApiClient, id: &str) -> Result<()> {
    api.delete(api.url(&format!("api/v1/jobs/{}", id))?).await?;
    println!("Removed job {}", id);
    Ok(())
}
