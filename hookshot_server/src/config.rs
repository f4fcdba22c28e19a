//! Server configuration.

use std::path::PathBuf;

use crate::store::DEFAULT_MAX_REQUESTS;

/// Default cap on webhook body size
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Default cap on a single tunnel WebSocket message
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public URL prefix advertised to clients (e.g. "https://relay.example.com").
    /// Falls back to the bind address when unset.
    pub public_url: Option<String>,

    /// Maximum requests retained per tunnel
    pub max_requests: usize,

    /// Shared secret required from clients and API callers when set
    pub token: Option<String>,

    /// TLS certificate chain (PEM). Set together with `tls_key` or not at all.
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    pub tls_key: Option<PathBuf>,

    /// Cap on webhook body size; over-cap requests get 413
    pub max_body_bytes: usize,

    /// Cap on a single tunnel message
    pub max_message_bytes: usize,

    /// Allowed WebSocket origins. Empty allows all; an empty `Origin` header
    /// (CLI clients) is always accepted.
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_url: None,
            max_requests: DEFAULT_MAX_REQUESTS,
            token: None,
            tls_cert: None,
            tls_key: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid public_url: {0}")]
    InvalidPublicUrl(#[source] url::ParseError),

    #[error("both tls_cert and tls_key must be set, or neither")]
    TlsPairIncomplete,

    #[error("TLS file not found: {0}")]
    TlsFileMissing(PathBuf),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(public_url) = &self.public_url {
            url::Url::parse(public_url).map_err(ConfigError::InvalidPublicUrl)?;
        }

        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::TlsPairIncomplete);
        }
        for path in [&self.tls_cert, &self.tls_key].into_iter().flatten() {
            if !path.exists() {
                return Err(ConfigError::TlsFileMissing(path.clone()));
            }
        }

        Ok(())
    }

    /// Prefix for tunnel public URLs, without a trailing slash
    pub fn public_url_base(&self) -> String {
        match &self.public_url {
            Some(public_url) => public_url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn public_url_base_trims_and_falls_back() {
        let mut config = Config::default();
        assert_eq!(config.public_url_base(), "http://0.0.0.0:8080");

        config.public_url = Some("https://relay.example.com/".to_string());
        assert_eq!(config.public_url_base(), "https://relay.example.com");
    }

    #[test]
    fn tls_pair_must_be_complete() {
        let config = Config {
            tls_cert: Some(PathBuf::from("/tmp/cert.pem")),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TlsPairIncomplete)
        ));
    }

    #[test]
    fn bad_public_url_is_rejected() {
        let config = Config {
            public_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPublicUrl(_))
        ));
    }
}
