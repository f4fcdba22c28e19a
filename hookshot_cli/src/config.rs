//! Configuration file handling and flag/file layering.
//!
//! The file is YAML with `server` and `client` sections mirroring the CLI
//! flags. A file value applies only when the corresponding flag was not
//! given on the command line.

use crate::client::forwarder::Route;
use crate::client::ClientOptions;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TARGET: &str = "http://localhost:3000";

/// The full configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub public_url: Option<String>,
    pub max_requests: Option<usize>,
    pub token: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSection {
    pub server: Option<String>,
    pub target: Option<String>,
    pub tunnel_id: Option<String>,
    pub token: Option<String>,
    pub verbose: Option<bool>,
    /// Route webhooks to different local targets by path prefix
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// One path-prefix route in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub path: String,
    pub target: String,
}

/// `server` subcommand flags, None when not given
#[derive(Debug, Default)]
pub struct ServerFlags {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub public_url: Option<String>,
    pub max_requests: Option<usize>,
    pub token: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

/// `client` subcommand flags, None when not given
#[derive(Debug, Default)]
pub struct ClientFlags {
    pub server: Option<String>,
    pub target: Option<String>,
    pub id: Option<String>,
    pub token: Option<String>,
    pub verbose: bool,
}

/// Load the config file: the explicit path when given (and it must parse),
/// otherwise the first file found in the standard locations, otherwise
/// defaults.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: FileConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Candidate config locations, in precedence order
fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("hookshot.yaml"),
        PathBuf::from("hookshot.yml"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("hookshot").join("config.yaml"));
        candidates.push(home.join(".hookshot.yaml"));
    }
    candidates
}

fn find_config_file() -> Option<PathBuf> {
    candidate_paths().into_iter().find(|path| path.exists())
}

impl ServerSection {
    /// Merge flags over the file section into a server config.
    pub fn merged(self, flags: ServerFlags) -> hookshot_server::Config {
        let defaults = hookshot_server::Config::default();
        hookshot_server::Config {
            host: flags.host.or(self.host).unwrap_or(defaults.host),
            port: flags.port.or(self.port).unwrap_or(defaults.port),
            public_url: flags.public_url.or(self.public_url),
            max_requests: flags
                .max_requests
                .or(self.max_requests)
                .unwrap_or(defaults.max_requests),
            token: flags.token.or(self.token),
            tls_cert: flags.tls_cert.or(self.tls_cert),
            tls_key: flags.tls_key.or(self.tls_key),
            max_body_bytes: defaults.max_body_bytes,
            max_message_bytes: defaults.max_message_bytes,
            allowed_origins: self.allowed_origins,
        }
    }
}

impl ClientSection {
    /// Merge flags over the file section into client options. The server
    /// URL has no default; it must come from a flag or the file.
    pub fn merged(self, flags: ClientFlags) -> Result<ClientOptions> {
        let Some(server_url) = flags.server.or(self.server) else {
            bail!("server URL is required (--server or the config file)");
        };

        let opts = ClientOptions {
            server_url,
            target: flags
                .target
                .or(self.target)
                .unwrap_or_else(|| DEFAULT_TARGET.to_string()),
            routes: self
                .routes
                .into_iter()
                .map(|entry| Route {
                    path: entry.path,
                    target: entry.target,
                })
                .collect(),
            requested_id: flags.id.or(self.tunnel_id),
            token: flags.token.or(self.token),
            verbose: flags.verbose || self.verbose.unwrap_or(false),
        };
        validate_client(&opts)?;
        Ok(opts)
    }
}

fn validate_client(opts: &ClientOptions) -> Result<()> {
    let server = url::Url::parse(&opts.server_url).context("invalid server URL")?;
    if !matches!(server.scheme(), "http" | "https" | "ws" | "wss") {
        bail!(
            "invalid server URL scheme: {} (must be http, https, ws, or wss)",
            server.scheme()
        );
    }

    url::Url::parse(&opts.target).context("invalid target URL")?;

    for (i, route) in opts.routes.iter().enumerate() {
        if route.path.is_empty() {
            bail!("route {i}: path is required");
        }
        if route.target.is_empty() {
            bail!("route {i}: target is required");
        }
        url::Url::parse(&route.target).with_context(|| format!("route {i}: invalid target URL"))?;
    }

    Ok(())
}
