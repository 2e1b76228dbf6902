//! Client-side subcommands that talk to a running scheduler's admin API.

use anyhow::{Context as _, Result, bail};

use crate::args::{HealthArgs, KillArgs};

pub async fn run_kill(args: KillArgs) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!(
        "{}/v0/task/kill/{}",
        args.endpoint.trim_end_matches('/'),
        args.task_id
    );
    let resp = client
        .get(&url)
        .basic_auth(&args.username, Some(&args.password))
        .send()
        .await
        .context("send kill request")?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_success() && body == "ok" {
        println!("Killed task {}", args.task_id);
        Ok(())
    } else {
        bail!("kill failed with status {status}: {body}")
    }
}

pub async fn run_health(args: HealthArgs) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{}/v0/health", args.endpoint.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .basic_auth(&args.username, Some(&args.password))
        .send()
        .await
        .context("send health request")?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_success() {
        println!("Scheduler healthy: {body}");
        Ok(())
    } else {
        bail!("health check failed with status {status}: {body}")
    }
}
