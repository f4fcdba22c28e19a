//! Tunnel client: reconnect loop, session loop, request dispatch.

pub mod display;
pub mod forwarder;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use display::Display;
use forwarder::{Forwarder, Route};
use futures_util::{SinkExt, StreamExt};
use hookshot_common::{
    Envelope, ErrorPayload, HttpRequest, HttpResponse, RegisterPayload, RegisteredPayload, Tag,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Initial reconnect delay; also the delay after a dropped session
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Backoff cap for repeated connect failures
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Deadline for the dial and for the registration reply
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const OUTBOUND_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_url: String,
    pub target: String,
    pub routes: Vec<Route>,
    pub requested_id: Option<String>,
    pub token: Option<String>,
    pub verbose: bool,
}

/// Details of the active registration
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub tunnel_id: String,
    pub public_url: String,
    pub target: String,
    pub server_url: String,
}

/// One relayed exchange, for the TUI
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub request_headers: HashMap<String, String>,
    pub request_body: Vec<u8>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Vec<u8>,
    pub error: Option<String>,
}

/// Events surfaced to the TUI
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected(ConnectionInfo),
    Disconnected,
    Reconnecting { attempt: u32 },
    Request(Box<RequestRecord>),
}

pub struct Client {
    opts: ClientOptions,
    forwarder: Arc<Forwarder>,
    display: Display,
    events: Option<mpsc::Sender<ClientEvent>>,
}

struct Session {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub fn new(opts: ClientOptions) -> Result<Self> {
        let forwarder = Arc::new(Forwarder::new(&opts.target, opts.routes.clone())?);
        let display = Display::new(opts.verbose);
        Ok(Self {
            opts,
            forwarder,
            display,
            events: None,
        })
    }

    /// Route connection and request events to a TUI instead of the console.
    pub fn set_event_channel(&mut self, events: mpsc::Sender<ClientEvent>) {
        self.display = self.display.clone().silenced();
        self.events = Some(events);
    }

    /// Connect and forward until the process is signalled. All
    /// connection-level errors are retryable; the loop never gives up.
    pub async fn run(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        let mut delay = RECONNECT_DELAY;

        loop {
            match self.connect().await {
                Ok(session) => {
                    attempt = 0;
                    delay = RECONNECT_DELAY;

                    if let Err(err) = self.run_session(session).await {
                        self.display.disconnected(&err);
                    }
                    self.emit(ClientEvent::Disconnected).await;

                    attempt += 1;
                    self.display.reconnecting(attempt);
                    self.emit(ClientEvent::Reconnecting { attempt }).await;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                Err(err) => {
                    self.display.disconnected(&err);
                    self.emit(ClientEvent::Disconnected).await;

                    attempt += 1;
                    self.display.reconnecting(attempt);
                    self.emit(ClientEvent::Reconnecting { attempt }).await;
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay);
                }
            }
        }
    }

    /// Dial the server and complete the register/registered exchange.
    async fn connect(&self) -> Result<Session> {
        let url = websocket_url(&self.opts.server_url)?;

        let (mut socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .context("timed out connecting to server")?
            .context("failed to connect to server")?;

        let register = Envelope::new(
            Tag::Register,
            &RegisterPayload {
                tunnel_id: self.opts.requested_id.clone(),
                token: self.opts.token.clone(),
            },
        )?;
        socket
            .send(Message::Text(register.to_text()?.into()))
            .await
            .context("failed to send register")?;

        let reply = tokio::time::timeout(CONNECT_TIMEOUT, socket.next())
            .await
            .context("timed out waiting for registration")?
            .ok_or_else(|| anyhow::anyhow!("connection closed before registration"))?
            .context("websocket error during registration")?;

        let Message::Text(text) = reply else {
            anyhow::bail!("unexpected registration frame");
        };
        let envelope = Envelope::from_text(&text).context("invalid registration envelope")?;

        match envelope.tag {
            Tag::Registered => {
                let registered: RegisteredPayload = envelope.parse_payload()?;
                let info = ConnectionInfo {
                    tunnel_id: registered.tunnel_id,
                    public_url: registered.public_url,
                    target: self.opts.target.clone(),
                    server_url: self.opts.server_url.clone(),
                };
                self.display.connected(&info);
                self.emit(ClientEvent::Connected(info)).await;
                Ok(Session { socket })
            }
            Tag::Error => {
                let detail: ErrorPayload = envelope.parse_payload().unwrap_or_else(|_| ErrorPayload {
                    code: "error".to_string(),
                    message: "registration rejected".to_string(),
                });
                anyhow::bail!("server rejected registration: {}", detail.message)
            }
            tag => anyhow::bail!("unexpected registration envelope: {tag:?}"),
        }
    }

    /// Read envelopes until the socket dies. Requests are dispatched
    /// concurrently; their responses funnel back through one outbound
    /// channel so only this loop writes to the socket.
    async fn run_session(&self, session: Session) -> Result<()> {
        let (mut write, mut read) = session.socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

        loop {
            tokio::select! {
                queued = outbound_rx.recv() => {
                    if let Some(text) = queued {
                        write
                            .send(Message::Text(text.into()))
                            .await
                            .context("write failed")?;
                    }
                }
                frame = read.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(err)) => return Err(err).context("read error"),
                        None => return Ok(()),
                    };
                    match frame {
                        Message::Text(text) => self.dispatch(&text, &outbound_tx),
                        Message::Ping(payload) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .context("write failed")?;
                        }
                        Message::Close(_) => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str, outbound: &mpsc::Sender<String>) {
        // A malformed envelope never kills the session.
        let envelope = match Envelope::from_text(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(error = %err, "malformed envelope");
                return;
            }
        };

        match envelope.tag {
            Tag::Request => {
                let request: HttpRequest = match envelope.parse_payload() {
                    Ok(request) => request,
                    Err(err) => {
                        tracing::debug!(error = %err, "invalid request payload");
                        return;
                    }
                };
                let forwarder = self.forwarder.clone();
                let display = self.display.clone();
                let events = self.events.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    handle_request(forwarder, display, events, outbound, request).await;
                });
            }
            // Answer application pings whatever their provenance.
            Tag::Ping => {
                if let Ok(pong) = Envelope::bare(Tag::Pong).to_text() {
                    let _ = outbound.try_send(pong);
                }
            }
            Tag::Pong => {}
            tag => tracing::debug!(?tag, "ignoring unexpected envelope"),
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event).await;
        }
    }
}

/// Forward one request to the local target and write the response envelope
/// back. Always answers under the original request id; failures become a
/// synthesized plain-text 502.
async fn handle_request(
    forwarder: Arc<Forwarder>,
    display: Display,
    events: Option<mpsc::Sender<ClientEvent>>,
    outbound: mpsc::Sender<String>,
    request: HttpRequest,
) {
    display.request(&request);
    let started = Instant::now();

    let (response, error) = match forwarder.forward(&request).await {
        Ok(response) => (response, None),
        Err(err) => {
            display.error(&request, &err);
            let message = err.to_string();
            let response = HttpResponse {
                request_id: request.id.clone(),
                status_code: 502,
                headers: HashMap::from([(
                    "Content-Type".to_string(),
                    "text/plain".to_string(),
                )]),
                body: format!("failed to forward: {message}").into_bytes(),
            };
            (response, Some(message))
        }
    };
    let duration = started.elapsed();

    if error.is_none() {
        display.response(&request, &response, duration);
    }

    if let Some(events) = &events {
        let record = RequestRecord {
            id: request.id.clone(),
            method: request.method.clone(),
            path: request.path.clone(),
            status_code: response.status_code,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
            request_headers: request.headers.clone(),
            request_body: request.body.clone(),
            response_headers: response.headers.clone(),
            response_body: response.body.clone(),
            error,
        };
        // Drop the record rather than stall forwarding when the UI lags.
        let _ = events.try_send(ClientEvent::Request(Box::new(record)));
    }

    match Envelope::new(Tag::Response, &response).and_then(|e| e.to_text()) {
        Ok(text) => {
            let _ = outbound.send(text).await;
        }
        Err(err) => tracing::error!(error = %err, "failed to encode response"),
    }
}

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_RECONNECT_DELAY)
}

/// Turn the configured server URL into the tunnel endpoint URL.
fn websocket_url(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url).context("invalid server URL")?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => anyhow::bail!("unsupported server URL scheme: {other}"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("invalid server URL"))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
}
