//! Scheduler commands.

use anyhow::Result;
use serde_json::Value;

use super::ApiClient;

fn print_status(status: &Value) {
    let state = if status["running"].as_bool().unwrap_or(false) {
        "running"
    } else {
        "stopped"
    };
    println!(
        "Scheduler {} (tick every {}s, timezone {})",
        state, status["tick_interval_secs"], status["timezone"].as_str().unwrap_or("-")
    );
    let tick = &status["last_tick"];
    if !tick.is_null() {
        println!(
            "Last tick {}: {} due, {} succeeded, {} failed, {} jobs",
            tick["at"].as_str().unwrap_or("-"),
            tick["due"],
            tick["succeeded"],
            tick["failed"],
            tick["jobs_enqueued"]
        );
    }
}

pub async fn start(api: &ApiClient) -> Result<()> {
    let status = api.post(api.url("api/v1/scheduler/start")?, None).await?;
    print_status(&status);
    Ok(())
}

pub async fn stop(api: &ApiClient) -> Result<()> {
    let status = api.post(api.url("api/v1/scheduler/stop")?, None).await?;
    print_status(&status);
    Ok(())
}

pub async fn status(api: &ApiClient) -> Result<()> {
    let status = api.get(api.url("api/v1/scheduler")?).await?;
    print_status(&status);
    Ok(())
}
