//! Route handlers for the relay server.

pub mod api;
pub mod webhook;
pub mod ws;

use crate::config::Config;
use crate::registry::TunnelRegistry;
use crate::store::RequestStore;
use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TunnelRegistry>,
    pub store: Arc<RequestStore>,
}

/// Build the full public router
pub fn router(state: AppState) -> Router {
    // API routes are bearer-gated when a token is configured; webhook
    // ingress never is, since external callers cannot know the token.
    let api = Router::new()
        .route("/api/tunnels/{tunnel_id}/requests", get(api::list_requests))
        .route(
            "/api/tunnels/{tunnel_id}/requests/{request_id}/replay",
            post(api::replay_request),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .merge(api)
        .route("/t/{tunnel_id}", any(webhook::handle_root))
        .route("/t/{tunnel_id}/{*path}", any(webhook::handle_path))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::DEFAULT_MAX_REQUESTS;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    pub(crate) fn test_state(token: Option<&str>, max_requests: usize) -> AppState {
        let store = Arc::new(RequestStore::new(max_requests));
        let registry = Arc::new(TunnelRegistry::new(store.clone()));
        let config = Config {
            token: token.map(String::from),
            ..Config::default()
        };
        AppState {
            config: Arc::new(config),
            registry,
            store,
        }
    }

    #[tokio::test]
    async fn health_is_open() {
        let app = router(test_state(Some("secret"), DEFAULT_MAX_REQUESTS));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 16).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }
}
