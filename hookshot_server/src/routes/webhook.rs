//! Public webhook ingress: materialize an envelope, forward, replay the
//! response to the caller.

use crate::routes::AppState;
use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use hookshot_common::{new_request_id, short_id, HttpRequest, HttpResponse};
use std::collections::HashMap;

/// `ANY /t/{tunnel_id}`
pub async fn handle_root(
    State(state): State<AppState>,
    Path(tunnel_id): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Response {
    relay(state, tunnel_id, String::new(), method, query, headers, body).await
}

/// `ANY /t/{tunnel_id}/{*path}`
pub async fn handle_path(
    State(state): State<AppState>,
    Path((tunnel_id, path)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Response {
    relay(state, tunnel_id, path, method, query, headers, body).await
}

async fn relay(
    state: AppState,
    tunnel_id: String,
    rest: String,
    method: Method,
    query: Option<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some(tunnel) = state.registry.get(&tunnel_id).await else {
        return (StatusCode::NOT_FOUND, "tunnel not found").into_response();
    };

    let bytes = match axum::body::to_bytes(body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => return body_read_error(err),
    };

    // The path forwarded to the client is everything after /t/{tunnel_id},
    // with the raw query string reattached.
    let mut path = format!("/{rest}");
    if let Some(query) = query {
        path.push('?');
        path.push_str(&query);
    }

    let request = HttpRequest {
        id: new_request_id(),
        tunnel_id: tunnel_id.clone(),
        method: method.to_string(),
        path,
        headers: single_valued(&headers),
        body: bytes.to_vec(),
        timestamp: Utc::now(),
    };

    state.store.store(request.clone()).await;

    match tunnel.forward_request(&request).await {
        Ok(response) => relay_response(response),
        Err(err) => {
            tracing::warn!(
                request = %request.id,
                tunnel = short_id(&tunnel_id),
                method = %request.method,
                path = %request.path,
                error = %err,
                "forward failed"
            );
            (
                StatusCode::BAD_GATEWAY,
                format!("failed to forward request (id={})", request.id),
            )
                .into_response()
        }
    }
}

/// Over-cap bodies get 413; any other read failure gets 400.
fn body_read_error(err: axum::Error) -> Response {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(current) = source {
        if current.is::<http_body_util::LengthLimitError>() {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
        source = current.source();
    }
    (StatusCode::BAD_REQUEST, "failed to read body").into_response()
}

/// Flatten headers to a single-valued map, first value wins.
pub(crate) fn single_valued(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

/// Replay the client's response to the original caller.
pub(crate) fn relay_response(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "response build failed").into_response()
        })
}
