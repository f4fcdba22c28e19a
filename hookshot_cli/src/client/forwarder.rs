//! Dispatches relayed requests to the local target.

use anyhow::{Context, Result};
use hookshot_common::{is_hop_by_hop, HttpRequest, HttpResponse};
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Total deadline for one round-trip to the local target
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Maps a path prefix to a target URL
#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub target: String,
}

pub struct Forwarder {
    default_target: String,
    routes: Vec<Route>,
    http: reqwest::Client,
}

impl Forwarder {
    pub fn new(default_target: &str, routes: Vec<Route>) -> Result<Self> {
        // Redirects are the origin server's business, not the relay's.
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            default_target: default_target.to_string(),
            routes,
            http,
        })
    }

    /// Longest matching path prefix wins; equal lengths go to the first
    /// occurrence; no match falls back to the default target.
    pub fn resolve_target(&self, path: &str) -> &str {
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if path.starts_with(&route.path)
                && best.is_none_or(|current| route.path.len() > current.path.len())
            {
                best = Some(route);
            }
        }
        best.map(|route| route.target.as_str())
            .unwrap_or(&self.default_target)
    }

    /// Issue the request to the local target and return the observed
    /// response with hop-by-hop headers removed.
    pub async fn forward(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let target = self.resolve_target(&request.path);
        let url = build_url(target, &request.path)?;

        tracing::debug!(method = %request.method, url = %url, "forwarding to target");

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);

        let mut outbound = self.http.request(method, url);
        for (name, value) in outbound_headers(&request.headers) {
            outbound = outbound.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            outbound = outbound.body(request.body.clone());
        }

        let response = outbound.send().await.context("upstream request failed")?;
        let status_code = response.status().as_u16();
        let headers = response_headers(response.headers());
        let body = response
            .bytes()
            .await
            .context("failed to read upstream response")?
            .to_vec();

        Ok(HttpResponse {
            request_id: request.id.clone(),
            status_code,
            headers,
            body,
        })
    }
}

/// Resolve the relayed path against the target URL. The path always gets a
/// leading slash first, so targets with base paths are replaced rather than
/// extended.
pub fn build_url(target: &str, path: &str) -> Result<Url> {
    let base = Url::parse(target).context("invalid target URL")?;
    let path: Cow<'_, str> = if path.starts_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("/{path}"))
    };
    base.join(&path).context("invalid request path")
}

/// Request headers to send upstream. Hop-by-hop headers stay behind, and so
/// does Host: the target decides its own virtual host.
fn outbound_headers(headers: &HashMap<String, String>) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("host"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Response headers to relay back, single-valued with the first value
/// winning.
fn response_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            map.entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookshot_common::HOP_BY_HOP_HEADERS;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    fn forwarder_with_routes() -> Forwarder {
        Forwarder::new(
            "http://localhost:3000",
            vec![
                Route {
                    path: "/api".to_string(),
                    target: "http://localhost:4000".to_string(),
                },
                Route {
                    path: "/api/v2".to_string(),
                    target: "http://localhost:5000".to_string(),
                },
                Route {
                    path: "/api/v9".to_string(),
                    target: "http://localhost:6000".to_string(),
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let forwarder = forwarder_with_routes();
        assert_eq!(forwarder.resolve_target("/api/users"), "http://localhost:4000");
        assert_eq!(forwarder.resolve_target("/api/v2/users"), "http://localhost:5000");
        assert_eq!(forwarder.resolve_target("/other"), "http://localhost:3000");
    }

    #[test]
    fn equal_length_prefixes_go_to_the_first_route() {
        let forwarder = Forwarder::new(
            "http://localhost:3000",
            vec![
                Route {
                    path: "/a".to_string(),
                    target: "http://first".to_string(),
                },
                Route {
                    path: "/a".to_string(),
                    target: "http://second".to_string(),
                },
            ],
        )
        .unwrap();
        assert_eq!(forwarder.resolve_target("/a/x"), "http://first");
    }

    #[test]
    fn build_url_replaces_base_paths() {
        assert_eq!(
            build_url("http://host:9/base", "/x?y=1").unwrap().as_str(),
            "http://host:9/x?y=1"
        );
        assert_eq!(
            build_url("http://host/base/", "a/b").unwrap().as_str(),
            "http://host/a/b"
        );
        assert_eq!(
            build_url("http://localhost:3000", "/").unwrap().as_str(),
            "http://localhost:3000/"
        );
        assert!(build_url("not a url", "/x").is_err());
    }

    #[test]
    fn hop_by_hop_request_headers_are_stripped() {
        let mut headers = HashMap::new();
        for name in HOP_BY_HOP_HEADERS {
            headers.insert(name.to_string(), "x".to_string());
        }
        headers.insert("Host".to_string(), "public.example.com".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("X-Request-Id".to_string(), "abc".to_string());

        let outbound = outbound_headers(&headers);
        let names: Vec<&str> = outbound.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(outbound.len(), 2);
        assert!(names.contains(&"Content-Type"));
        assert!(names.contains(&"X-Request-Id"));
    }

    #[test]
    fn hop_by_hop_response_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        for name in HOP_BY_HOP_HEADERS {
            headers.insert(
                HeaderName::try_from(name.to_lowercase()).unwrap(),
                HeaderValue::from_static("x"),
            );
        }
        headers.insert("content-type", HeaderValue::from_static("text/html"));

        let relayed = response_headers(&headers);
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed["content-type"], "text/html");
    }
}
