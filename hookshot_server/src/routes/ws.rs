//! WebSocket tunnel endpoint: handshake, then the reader/writer pumps.

use crate::registry::TunnelRegistry;
use crate::routes::AppState;
use crate::tunnel::{Tunnel, PING_PERIOD, PONG_WAIT, WRITE_WAIT};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use hookshot_common::{
    Envelope, ErrorPayload, HttpResponse, RegisterPayload, RegisteredPayload, Tag,
    ERROR_CODE_UNAUTHORIZED,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Deadline for the register envelope after upgrade
pub const HANDSHAKE_WAIT: Duration = Duration::from_secs(10);

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&state.config.allowed_origins, &headers) {
        tracing::warn!("rejected tunnel connection: origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Browser connections must match a configured origin; CLI clients send no
/// `Origin` header and are always accepted.
fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        None | Some("") => true,
        Some(origin) => allowed.iter().any(|a| a == origin),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // The register envelope must arrive within the handshake deadline.
    // Malformed input is fatal at this stage.
    let text = match tokio::time::timeout(HANDSHAKE_WAIT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
            tracing::debug!("client disconnected before register");
            return;
        }
        Ok(Some(Ok(_))) => {
            tracing::warn!("expected a text register frame");
            return;
        }
        Ok(Some(Err(err))) => {
            tracing::debug!(error = %err, "websocket error before register");
            return;
        }
        Err(_) => {
            tracing::warn!("timeout waiting for register");
            return;
        }
    };

    let register = match Envelope::from_text(&text) {
        Ok(envelope) if envelope.tag == Tag::Register => {
            match envelope.parse_payload::<RegisterPayload>() {
                Ok(register) => register,
                Err(err) => {
                    tracing::warn!(error = %err, "invalid register payload");
                    return;
                }
            }
        }
        Ok(envelope) => {
            tracing::warn!(tag = ?envelope.tag, "expected register envelope");
            return;
        }
        Err(err) => {
            tracing::warn!(error = %err, "malformed register envelope");
            return;
        }
    };

    if let Some(expected) = &state.config.token {
        if register.token.as_deref() != Some(expected.as_str()) {
            tracing::warn!("unauthorized tunnel connection attempt");
            let rejection = ErrorPayload {
                code: ERROR_CODE_UNAUTHORIZED.to_string(),
                message: "invalid or missing auth token".to_string(),
            };
            if let Ok(envelope) = Envelope::new(Tag::Error, &rejection) {
                let _ = send_envelope(&mut sender, &envelope).await;
            }
            return;
        }
    }

    let (tunnel, outbound_rx) = state.registry.register(register.tunnel_id.as_deref()).await;

    // The registered confirmation is the one write that happens before the
    // writer pump takes ownership of the socket.
    let registered = RegisteredPayload {
        tunnel_id: tunnel.id().to_string(),
        public_url: format!("{}/t/{}", state.config.public_url_base(), tunnel.id()),
    };
    let confirmed = match Envelope::new(Tag::Registered, &registered) {
        Ok(envelope) => send_envelope(&mut sender, &envelope).await.is_ok(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode registered envelope");
            false
        }
    };
    if !confirmed {
        state.registry.unregister(tunnel.id()).await;
        return;
    }

    tracing::info!(tunnel = tunnel.short_id(), "tunnel registered");

    let writer = tokio::spawn(write_pump(sender, outbound_rx, tunnel.clone()));
    read_pump(receiver, tunnel.clone(), state.registry.clone()).await;
    let _ = writer.await;

    tracing::info!(tunnel = tunnel.short_id(), "tunnel disconnected");
}

async fn send_envelope(
    sender: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let text = envelope.to_text().map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}

/// Drains the outbound queue into the socket and keeps the transport alive
/// with periodic pings. Sole owner of the socket's write half; closes it on
/// exit, which also unblocks a reader stuck on a dead connection.
async fn write_pump(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    tunnel: Arc<Tunnel>,
) {
    let first_ping = tokio::time::Instant::now() + PING_PERIOD;
    let mut ping = tokio::time::interval_at(first_ping, PING_PERIOD);

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(text) = queued else { break };
                let written =
                    tokio::time::timeout(WRITE_WAIT, sender.send(Message::Text(text.into())))
                        .await;
                if !matches!(written, Ok(Ok(()))) {
                    tracing::debug!(tunnel = tunnel.short_id(), "write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                let written =
                    tokio::time::timeout(WRITE_WAIT, sender.send(Message::Ping(Bytes::new())))
                        .await;
                if !matches!(written, Ok(Ok(()))) {
                    tracing::debug!(tunnel = tunnel.short_id(), "ping failed");
                    break;
                }
            }
            _ = tunnel.done() => break,
        }
    }

    let _ = sender.close().await;
}

/// Reads envelopes until the socket dies or the liveness deadline expires,
/// then deregisters the tunnel.
async fn read_pump(
    mut receiver: SplitStream<WebSocket>,
    tunnel: Arc<Tunnel>,
    registry: Arc<TunnelRegistry>,
) {
    loop {
        // Every received frame, transport pongs included, refreshes the
        // deadline.
        let frame = match tokio::time::timeout(PONG_WAIT, receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => {
                tracing::debug!(tunnel = tunnel.short_id(), error = %err, "read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(tunnel = tunnel.short_id(), "liveness deadline expired");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Transport pings are answered by the websocket layer itself.
            _ => continue,
        };

        // Mid-session framing errors are dropped; the session survives.
        let envelope = match Envelope::from_text(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(tunnel = tunnel.short_id(), error = %err, "malformed envelope");
                continue;
            }
        };

        match envelope.tag {
            Tag::Response => {
                let response: HttpResponse = match envelope.parse_payload() {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::debug!(
                            tunnel = tunnel.short_id(),
                            error = %err,
                            "invalid response payload"
                        );
                        continue;
                    }
                };
                registry.store().store_response(response.clone()).await;
                // No waiter means the request already timed out; the
                // response is dropped silently.
                tunnel.deliver(response);
            }
            Tag::Pong => {}
            tag => {
                tracing::debug!(tunnel = tunnel.short_id(), ?tag, "ignoring unexpected envelope");
            }
        }
    }

    registry.unregister(tunnel.id()).await;
}
