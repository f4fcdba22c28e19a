//! API-consuming subcommands.

pub mod replay;
pub mod requests;

use anyhow::{Context, Result};

/// Normalize a server URL into the HTTP base for API calls: ws(s) schemes
/// map back to http(s), trailing slashes go away.
pub fn api_base_url(server_url: &str) -> Result<String> {
    let mut url = url::Url::parse(server_url).context("invalid server URL")?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        "http" | "https" => url.scheme(),
        other => anyhow::bail!("unsupported server URL scheme: {other}"),
    };
    let scheme = scheme.to_string();
    url.set_scheme(&scheme)
        .map_err(|_| anyhow::anyhow!("invalid server URL"))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_normalization() {
        assert_eq!(
            api_base_url("https://relay.example.com/").unwrap(),
            "https://relay.example.com"
        );
        assert_eq!(
            api_base_url("ws://localhost:8080").unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            api_base_url("wss://relay.example.com").unwrap(),
            "https://relay.example.com"
        );
        assert!(api_base_url("ftp://nope").is_err());
    }
}
