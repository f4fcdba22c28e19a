//! In-memory request history, bounded per tunnel.

use hookshot_common::{HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Default cap on stored requests per tunnel
pub const DEFAULT_MAX_REQUESTS: usize = 100;

/// A brief view of one stored request, for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: String,
    pub method: String,
    pub path: String,
    /// ISO-8601 UTC
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

#[derive(Default)]
struct StoreInner {
    requests: HashMap<String, HttpRequest>,
    responses: HashMap<String, HttpResponse>,
    /// Per-tunnel insertion order; the eviction queue
    order: HashMap<String, VecDeque<String>>,
}

/// Request/response history with FIFO eviction per tunnel. History is lost
/// on restart; there is no disk persistence.
pub struct RequestStore {
    inner: RwLock<StoreInner>,
    max_requests: usize,
}

impl RequestStore {
    pub fn new(max_requests: usize) -> Self {
        let max_requests = if max_requests == 0 {
            DEFAULT_MAX_REQUESTS
        } else {
            max_requests
        };
        Self {
            inner: RwLock::new(StoreInner::default()),
            max_requests,
        }
    }

    /// Store a request under its tunnel, evicting the oldest entries (and
    /// their responses) once the tunnel's queue exceeds the cap.
    pub async fn store(&self, request: HttpRequest) {
        let inner = &mut *self.inner.write().await;

        let queue = inner.order.entry(request.tunnel_id.clone()).or_default();
        queue.push_back(request.id.clone());
        inner.requests.insert(request.id.clone(), request);

        while queue.len() > self.max_requests {
            if let Some(oldest) = queue.pop_front() {
                inner.requests.remove(&oldest);
                inner.responses.remove(&oldest);
            }
        }
    }

    /// Store the response for a previously stored request. A response whose
    /// request is no longer stored is unreachable and is not retained.
    pub async fn store_response(&self, response: HttpResponse) {
        let inner = &mut *self.inner.write().await;
        if inner.requests.contains_key(&response.request_id) {
            inner.responses.insert(response.request_id.clone(), response);
        }
    }

    pub async fn get(&self, request_id: &str) -> Option<HttpRequest> {
        self.inner.read().await.requests.get(request_id).cloned()
    }

    pub async fn get_response(&self, request_id: &str) -> Option<HttpResponse> {
        self.inner.read().await.responses.get(request_id).cloned()
    }

    /// Summaries for a tunnel, newest first
    pub async fn list(&self, tunnel_id: &str) -> Vec<RequestSummary> {
        let inner = self.inner.read().await;
        let Some(queue) = inner.order.get(tunnel_id) else {
            return Vec::new();
        };

        queue
            .iter()
            .rev()
            .filter_map(|id| {
                let request = inner.requests.get(id)?;
                Some(RequestSummary {
                    id: request.id.clone(),
                    method: request.method.clone(),
                    path: request.path.clone(),
                    timestamp: request.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    status_code: inner.responses.get(id).map(|r| r.status_code),
                })
            })
            .collect()
    }

    /// Drop all history for a tunnel
    pub async fn clear(&self, tunnel_id: &str) {
        let inner = &mut *self.inner.write().await;
        if let Some(queue) = inner.order.remove(tunnel_id) {
            for id in queue {
                inner.requests.remove(&id);
                inner.responses.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(id: &str, tunnel_id: &str) -> HttpRequest {
        HttpRequest {
            id: id.to_string(),
            tunnel_id: tunnel_id.to_string(),
            method: "POST".to_string(),
            path: format!("/hook/{id}"),
            headers: HashMap::new(),
            body: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    fn response(request_id: &str, status_code: u16) -> HttpResponse {
        HttpResponse {
            request_id: request_id.to_string(),
            status_code,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn eviction_drops_the_eldest_requests_and_their_responses() {
        let store = RequestStore::new(3);

        for i in 0..5 {
            let id = format!("req-{i}");
            store.store(request(&id, "tun")).await;
            store.store_response(response(&id, 200)).await;
        }

        // Requests 0 and 1 are gone along with their responses.
        assert!(store.get("req-0").await.is_none());
        assert!(store.get("req-1").await.is_none());
        assert!(store.get_response("req-0").await.is_none());
        assert!(store.get_response("req-1").await.is_none());

        let listed = store.list("tun").await;
        assert_eq!(listed.len(), 3);
        // Newest first: 4, 3, 2.
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["req-4", "req-3", "req-2"]);
        assert!(listed.iter().all(|s| s.status_code == Some(200)));
    }

    #[tokio::test]
    async fn tunnels_evict_independently() {
        let store = RequestStore::new(2);

        store.store(request("a-1", "a")).await;
        store.store(request("a-2", "a")).await;
        store.store(request("a-3", "a")).await;
        store.store(request("b-1", "b")).await;

        assert!(store.get("a-1").await.is_none());
        assert!(store.get("a-2").await.is_some());
        assert_eq!(store.list("b").await.len(), 1);
    }

    #[tokio::test]
    async fn orphan_responses_are_not_retained() {
        let store = RequestStore::new(10);
        store.store_response(response("never-stored", 200)).await;
        assert!(store.get_response("never-stored").await.is_none());
    }

    #[tokio::test]
    async fn summaries_render_iso8601_and_optional_status() {
        let store = RequestStore::new(10);
        store.store(request("req-1", "tun")).await;

        let listed = store.list("tun").await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].status_code.is_none());
        // e.g. 2026-08-02T10:00:00Z
        assert_eq!(listed[0].timestamp.len(), 20);
        assert!(listed[0].timestamp.ends_with('Z'));
        assert_eq!(&listed[0].timestamp[4..5], "-");
        assert_eq!(&listed[0].timestamp[10..11], "T");
    }

    #[tokio::test]
    async fn clear_removes_everything_for_a_tunnel() {
        let store = RequestStore::new(10);
        store.store(request("req-1", "tun")).await;
        store.store_response(response("req-1", 204)).await;

        store.clear("tun").await;

        assert!(store.get("req-1").await.is_none());
        assert!(store.get_response("req-1").await.is_none());
        assert!(store.list("tun").await.is_empty());
    }

    #[tokio::test]
    async fn list_for_unknown_tunnel_is_empty() {
        let store = RequestStore::new(10);
        assert!(store.list("missing").await.is_empty());
    }
}
