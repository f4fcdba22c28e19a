//! `hookshot requests` - list recent requests for a tunnel.

use super::api_base_url;
use anyhow::{bail, Context, Result};
use console::style;
use hookshot_server::store::RequestSummary;

pub async fn run(server: &str, tunnel: &str, token: Option<&str>) -> Result<()> {
    let base = api_base_url(server)?;
    let url = format!("{base}/api/tunnels/{tunnel}/requests");

    let client = reqwest::Client::new();
    let mut request = client.get(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context("failed to fetch requests")?;
    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        bail!("unauthorized (check --token)");
    }
    if !response.status().is_success() {
        bail!("server returned {}", response.status());
    }

    let summaries: Vec<RequestSummary> = response
        .json()
        .await
        .context("failed to parse response")?;

    if summaries.is_empty() {
        println!("No requests found");
        return Ok(());
    }

    println!(
        "Recent requests for tunnel {}:\n",
        style(tunnel).cyan()
    );
    for summary in &summaries {
        let status = match summary.status_code {
            Some(code) if code >= 500 => style(code.to_string()).red(),
            Some(code) if code >= 400 => style(code.to_string()).yellow(),
            Some(code) if code >= 300 => style(code.to_string()).cyan(),
            Some(code) => style(code.to_string()).green(),
            None => style("-".to_string()).dim(),
        };

        println!(
            "  {}  {}  {:<7} {}  {}",
            style(&summary.id).black().bright(),
            style(&summary.timestamp).dim(),
            style(&summary.method).yellow(),
            summary.path,
            status,
        );
    }

    Ok(())
}
