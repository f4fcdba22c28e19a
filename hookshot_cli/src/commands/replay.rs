//! `hookshot replay` - re-issue a stored request.

use super::api_base_url;
use anyhow::{bail, Context, Result};
use console::style;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ReplayOutcome {
    request_id: String,
    status_code: u16,
    body_length: usize,
}

pub async fn run(server: &str, tunnel: &str, request_id: &str, token: Option<&str>) -> Result<()> {
    let base = api_base_url(server)?;
    let url = format!("{base}/api/tunnels/{tunnel}/requests/{request_id}/replay");

    let client = reqwest::Client::new();
    let mut request = client.post(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context("failed to replay request")?;
    match response.status() {
        reqwest::StatusCode::UNAUTHORIZED => bail!("unauthorized (check --token)"),
        reqwest::StatusCode::NOT_FOUND => bail!("request {request_id} not found on tunnel {tunnel}"),
        status if !status.is_success() => bail!("replay failed with status {status}"),
        _ => {}
    }

    let outcome: ReplayOutcome = response.json().await.context("failed to parse response")?;

    println!("Replayed request {}", style(request_id).cyan());
    println!("  New request ID: {}", style(&outcome.request_id).cyan());
    println!("  Status:         {}", style(outcome.status_code).green());
    println!("  Body length:    {} bytes", outcome.body_length);

    Ok(())
}
