//! Tunnel handle: outbound queue, pending-response correlation, done signal.
//!
//! A `Tunnel` is transport-free. The WebSocket pumps that feed it live in
//! `routes::ws`; everything here can be exercised without a socket.

use hookshot_common::{short_id, Envelope, HttpRequest, HttpResponse, ProtocolError, Tag};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

/// Capacity of the outbound envelope queue
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Deadline for a single socket write
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Read deadline; refreshed by any inbound frame, including transport pongs
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Transport ping cadence
pub const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);

/// End-to-end deadline for one forwarded request, queue wait included
pub const RESPONSE_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel closed")]
    Closed,

    #[error("timed out waiting for response")]
    Timeout,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

type PendingTable = Mutex<HashMap<String, oneshot::Sender<HttpResponse>>>;

/// One connected client tunnel.
pub struct Tunnel {
    id: String,
    outbound: mpsc::Sender<String>,
    pending: PendingTable,
    done: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Tunnel {
    /// Create a tunnel and the receiving end of its outbound queue.
    /// The receiver belongs to the single writer pump for this tunnel.
    pub fn new(id: String) -> (Self, mpsc::Receiver<String>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (done, _) = watch::channel(false);
        (
            Self {
                id,
                outbound,
                pending: Mutex::new(HashMap::new()),
                done,
                closed: AtomicBool::new(false),
            },
            outbound_rx,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display form of the id; the only form that may reach logs
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Fire the done signal. Idempotent; multiple shutdown paths race here.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.done.send(true);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the done signal has fired
    pub async fn done(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|closed| *closed).await;
    }

    /// Relay a request through the tunnel and wait for the correlated
    /// response, up to [`RESPONSE_WAIT`]. The pending entry is removed on
    /// every exit path, including caller-side cancellation.
    pub async fn forward_request(
        &self,
        request: &HttpRequest,
    ) -> Result<HttpResponse, TunnelError> {
        match tokio::time::timeout(RESPONSE_WAIT, self.relay(request)).await {
            Ok(result) => result,
            Err(_) => Err(TunnelError::Timeout),
        }
    }

    async fn relay(&self, request: &HttpRequest) -> Result<HttpResponse, TunnelError> {
        let (response_tx, response_rx) = oneshot::channel();
        lock(&self.pending).insert(request.id.clone(), response_tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &request.id,
        };

        if self.is_closed() {
            return Err(TunnelError::Closed);
        }

        let text = Envelope::new(Tag::Request, request)?.to_text()?;

        tokio::select! {
            queued = self.outbound.send(text) => {
                if queued.is_err() {
                    return Err(TunnelError::Closed);
                }
            }
            _ = self.done() => return Err(TunnelError::Closed),
        }

        tokio::select! {
            response = response_rx => response.map_err(|_| TunnelError::Closed),
            _ = self.done() => Err(TunnelError::Closed),
        }
    }

    /// Route a response to its waiter. The slot is removed before sending,
    /// so a duplicate response for the same request id finds no receiver.
    /// Returns false when no waiter existed (the requester already gave up).
    pub fn deliver(&self, response: HttpResponse) -> bool {
        let waiter = lock(&self.pending).remove(&response.request_id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

fn lock(pending: &PendingTable) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<HttpResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the pending entry when the enclosing future exits or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hookshot_common::new_request_id;
    use std::sync::Arc;

    fn request(id: &str, tunnel_id: &str) -> HttpRequest {
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

    fn response(request_id: &str, status_code: u16) -> HttpResponse {
        HttpResponse {
            request_id: request_id.to_string(),
            status_code,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn concurrent_forwards_correlate_by_request_id() {
        let (tunnel, mut outbound) = Tunnel::new("t".repeat(32));
        let tunnel = Arc::new(tunnel);

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let id = new_request_id();
            let tunnel = tunnel.clone();
            let req = request(&id, "t");
            waiters.push((id, tokio::spawn(async move { tunnel.forward_request(&req).await })));
        }

        // Drain the queue, then answer in reverse order with a status code
        // derived from each request id.
        let mut sent = Vec::new();
        for _ in 0..waiters.len() {
            let text = outbound.recv().await.unwrap();
            let relayed: HttpRequest = Envelope::from_text(&text).unwrap().parse_payload().unwrap();
            sent.push(relayed.id);
        }
        for (i, id) in sent.iter().enumerate().rev() {
            assert!(tunnel.deliver(response(id, 200 + i as u16)));
        }

        for (id, waiter) in waiters {
            let got = waiter.await.unwrap().unwrap();
            assert_eq!(got.request_id, id);
            let position = sent.iter().position(|s| s == &id).unwrap();
            assert_eq!(got.status_code, 200 + position as u16);
        }
        assert_eq!(tunnel.pending_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_response_is_dropped() {
        let (tunnel, mut outbound) = Tunnel::new("t".repeat(32));
        let tunnel = Arc::new(tunnel);

        let req = request("aaaa1111", "t");
        let waiter = {
            let tunnel = tunnel.clone();
            let req = req.clone();
            tokio::spawn(async move { tunnel.forward_request(&req).await })
        };
        outbound.recv().await.unwrap();

        assert!(tunnel.deliver(response("aaaa1111", 200)));
        assert!(!tunnel.deliver(response("aaaa1111", 500)));

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.status_code, 200);
    }

    #[tokio::test]
    async fn cancellation_clears_the_pending_entry() {
        let (tunnel, mut outbound) = Tunnel::new("t".repeat(32));
        let req = request("bbbb2222", "t");

        {
            let forward = tunnel.forward_request(&req);
            tokio::pin!(forward);
            tokio::select! {
                _ = &mut forward => panic!("no response was sent"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            // Dropping the future here models the caller timing out.
        }

        assert_eq!(tunnel.pending_len(), 0);
        // A late response for the cancelled request finds no waiter.
        assert!(!tunnel.deliver(response("bbbb2222", 200)));
        // The envelope was still enqueued; it rots in the queue harmlessly.
        assert!(outbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn forward_fails_once_done_fires() {
        let (tunnel, _outbound) = Tunnel::new("t".repeat(32));
        tunnel.close();
        tunnel.close(); // idempotent

        let err = tunnel.forward_request(&request("cccc3333", "t")).await.unwrap_err();
        assert!(matches!(err, TunnelError::Closed));
        assert_eq!(tunnel.pending_len(), 0);
    }

    #[tokio::test]
    async fn done_unblocks_inflight_forward() {
        let (tunnel, mut outbound) = Tunnel::new("t".repeat(32));
        let tunnel = Arc::new(tunnel);

        let waiter = {
            let tunnel = tunnel.clone();
            let req = request("dddd4444", "t");
            tokio::spawn(async move { tunnel.forward_request(&req).await })
        };
        outbound.recv().await.unwrap();

        tunnel.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, TunnelError::Closed));
        assert_eq!(tunnel.pending_len(), 0);
    }
}
