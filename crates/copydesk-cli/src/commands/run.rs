//! Manual runs and work item commands.

use anyhow::Result;
use serde_json::json;

use super::ApiClient;

pub async fn start(
    api: &ApiClient,
    client: &str,
    limit: Option<u32>,
    only_if_due: bool,
) -> Result<()> {
    let url = api.url(&format!("api/v1/clients/{}/automation", client))?;
    let body = json!({ "job_limit": limit, "only_if_due": only_if_due });
    let run = api.post(url, Some(body)).await?;

    if run["success"].as_bool().unwrap_or(false) {
        println!(
            "Enqueued {} of at most {} items",
            run["job_count"], run["job_limit"]
        );
        for job in run["job_ids"].as_array().into_iter().flatten() {
            println!("  {}", job.as_str().unwrap_or("-"));
        }
    } else {
        println!("No pending work for client {}", client);
    }
    Ok(())
}

pub async fn batches(api: &ApiClient, client: &str) -> Result<()> {
    let url = api.url(&format!("api/v1/clients/{}/batches", client))?;
    let batches = api.get(url).await?;
    println!(
        "{:<36}  {:>5} {:>7} {:>10} {:>8} {:>4} {:>6}",
        "BATCH", "TOTAL", "PENDING", "PROCESSING", "APPROVAL", "DONE", "FAILED"
    );
    for batch in batches.as_array().into_iter().flatten() {
        println!(
            "{:<36}  {:>5} {:>7} {:>10} {:>8} {:>4} {:>6}",
            batch["batch_id"].as_str().unwrap_or("-"),
            batch["total"],
            batch["pending"],
            batch["processing"],
            batch["pending_approval"],
            batch["done"],
            batch["failed"]
        );
    }
    Ok(())
}

pub async fn reset(api: &ApiClient, work_item: &str) -> Result<()> {
    let url = api.url(&format!("api/v1/work-items/{}/reset", work_item))?;
    let item = api.post(url, None).await?;
    println!(
        "Work item {} is {}",
        work_item,
        item["status"].as_str().unwrap_or("-")
    );
    Ok(())
}
