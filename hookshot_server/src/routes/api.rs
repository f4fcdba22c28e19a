//! Request history API: listing and replay. Bearer-gated when a token is
//! configured.

use crate::routes::AppState;
use crate::store::RequestSummary;
use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use hookshot_common::{new_request_id, short_id, HttpRequest};

/// Middleware for `/api/*`. Only the Authorization header is consulted;
/// query-string tokens are refused because they leak through logs and
/// proxies.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.config.token {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);
        if !authorized {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    next.run(request).await
}

/// `GET /api/tunnels/{tunnel_id}/requests`, newest first. A tunnel with no
/// history (or one that never existed) lists as empty.
pub async fn list_requests(
    State(state): State<AppState>,
    Path(tunnel_id): Path<String>,
) -> Json<Vec<RequestSummary>> {
    Json(state.store.list(&tunnel_id).await)
}

/// `POST /api/tunnels/{tunnel_id}/requests/{request_id}/replay` re-issues a
/// stored request under a fresh id. The stored request must belong to the
/// tunnel named in the path; anything else is indistinguishable from a
/// missing request.
pub async fn replay_request(
    State(state): State<AppState>,
    Path((tunnel_id, request_id)): Path<(String, String)>,
) -> Response {
    let Some(tunnel) = state.registry.get(&tunnel_id).await else {
        return (StatusCode::NOT_FOUND, "tunnel not found").into_response();
    };

    let Some(stored) = state.store.get(&request_id).await else {
        return (StatusCode::NOT_FOUND, "request not found").into_response();
    };
    if stored.tunnel_id != tunnel_id {
        return (StatusCode::NOT_FOUND, "request not found").into_response();
    }

    let replay = HttpRequest {
        id: new_request_id(),
        tunnel_id: tunnel_id.clone(),
        method: stored.method,
        path: stored.path,
        headers: stored.headers,
        body: stored.body,
        timestamp: Utc::now(),
    };

    state.store.store(replay.clone()).await;

    match tunnel.forward_request(&replay).await {
        Ok(response) => Json(serde_json::json!({
            "request_id": replay.id,
            "status_code": response.status_code,
            "headers": response.headers,
            "body_length": response.body.len(),
        }))
        .into_response(),
        Err(err) => {
            tracing::warn!(
                request = %replay.id,
                tunnel = short_id(&tunnel_id),
                original = %request_id,
                error = %err,
                "replay failed"
            );
            (
                StatusCode::BAD_GATEWAY,
                format!("failed to replay request (id={})", replay.id),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::routes::tests::test_state;
    use crate::store::DEFAULT_MAX_REQUESTS;
    use axum::body::Body;
    use axum::http::Request as HttpRequestBuilder;
    use chrono::Utc;
    use hookshot_common::HttpResponse;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn stored_request(id: &str, tunnel_id: &str) -> HttpRequest {
        HttpRequest {
            id: id.to_string(),
            tunnel_id: tunnel_id.to_string(),
            method: "POST".to_string(),
            path: "/hook".to_string(),
            headers: HashMap::new(),
            body: b"payload".to_vec(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn api_requires_a_bearer_token() {
        let state = test_state(Some("secret"), DEFAULT_MAX_REQUESTS);

        // No credentials.
        let response = router(state.clone())
            .oneshot(
                HttpRequestBuilder::builder()
                    .uri("/api/tunnels/abc/requests")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Query-string tokens are refused even when correct.
        let response = router(state.clone())
            .oneshot(
                HttpRequestBuilder::builder()
                    .uri("/api/tunnels/abc/requests?token=secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Correct bearer header.
        let response = router(state)
            .oneshot(
                HttpRequestBuilder::builder()
                    .uri("/api/tunnels/abc/requests")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_capped() {
        let state = test_state(None, 3);
        for i in 0..5 {
            state
                .store
                .store(stored_request(&format!("req-{i}"), "tun"))
                .await;
        }

        let response = router(state)
            .oneshot(
                HttpRequestBuilder::builder()
                    .uri("/api/tunnels/tun/requests")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let summaries: Vec<RequestSummary> = serde_json::from_slice(&body).unwrap();
        let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["req-4", "req-3", "req-2"]);
    }

    #[tokio::test]
    async fn replay_refuses_a_request_from_another_tunnel() {
        let state = test_state(None, DEFAULT_MAX_REQUESTS);
        let (tunnel, mut outbound) = state.registry.register(None).await;

        // Request stored under a different tunnel id.
        state.store.store(stored_request("req-1", "other")).await;

        let response = router(state)
            .oneshot(
                HttpRequestBuilder::builder()
                    .method("POST")
                    .uri(format!("/api/tunnels/{}/requests/req-1/replay", tunnel.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        // Nothing was forwarded through the tunnel.
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn replay_reissues_under_a_fresh_id() {
        let state = test_state(None, DEFAULT_MAX_REQUESTS);
        let (tunnel, mut outbound) = state.registry.register(None).await;
        state
            .store
            .store(stored_request("req-1", tunnel.id()))
            .await;

        let responder = {
            let tunnel = tunnel.clone();
            tokio::spawn(async move {
                let text = outbound.recv().await.unwrap();
                let relayed: HttpRequest = hookshot_common::Envelope::from_text(&text)
                    .unwrap()
                    .parse_payload()
                    .unwrap();
                assert_ne!(relayed.id, "req-1");
                assert_eq!(relayed.path, "/hook");
                assert_eq!(relayed.body, b"payload");
                tunnel.deliver(HttpResponse {
                    request_id: relayed.id.clone(),
                    status_code: 200,
                    headers: HashMap::new(),
                    body: b"done".to_vec(),
                });
                relayed.id
            })
        };

        let response = router(state.clone())
            .oneshot(
                HttpRequestBuilder::builder()
                    .method("POST")
                    .uri(format!("/api/tunnels/{}/requests/req-1/replay", tunnel.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let replay_id = responder.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let outcome: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(outcome["request_id"], replay_id);
        assert_eq!(outcome["status_code"], 200);
        assert_eq!(outcome["body_length"], 4);

        // The replay itself is now part of the history.
        assert_eq!(state.store.list(tunnel.id()).await.len(), 2);
    }

    #[tokio::test]
    async fn replay_for_a_dead_tunnel_is_404() {
        let state = test_state(None, DEFAULT_MAX_REQUESTS);
        state.store.store(stored_request("req-1", "gone")).await;

        let response = router(state)
            .oneshot(
                HttpRequestBuilder::builder()
                    .method("POST")
                    .uri("/api/tunnels/gone/requests/req-1/replay")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
