//! Process-wide registry of live tunnels.

use crate::store::RequestStore;
use crate::tunnel::Tunnel;
use hookshot_common::new_tunnel_id;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Maps tunnel ids to live tunnels. Registration, deregistration and
/// shutdown take the write lock; lookups take the read lock.
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<String, Arc<Tunnel>>>,
    store: Arc<RequestStore>,
}

impl TunnelRegistry {
    pub fn new(store: Arc<RequestStore>) -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Register a new tunnel under a fresh full-entropy id. The requested id
    /// is accepted for envelope compatibility and discarded: honoring it
    /// would let callers guess public webhook URLs.
    ///
    /// Returns the tunnel and the receiver half of its outbound queue, which
    /// belongs to the writer pump.
    pub async fn register(
        &self,
        requested_id: Option<&str>,
    ) -> (Arc<Tunnel>, mpsc::Receiver<String>) {
        if requested_id.is_some() {
            tracing::debug!("ignoring client-requested tunnel id");
        }

        let id = new_tunnel_id();
        let (tunnel, outbound_rx) = Tunnel::new(id.clone());
        let tunnel = Arc::new(tunnel);
        self.tunnels.write().await.insert(id, tunnel.clone());
        (tunnel, outbound_rx)
    }

    pub async fn get(&self, tunnel_id: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.read().await.get(tunnel_id).cloned()
    }

    /// Fire the tunnel's done signal and drop the entry. The outbound queue
    /// is left open: the writer drains and exits on done, and any racing
    /// `forward_request` fails on the done signal instead of a closed queue.
    pub async fn unregister(&self, tunnel_id: &str) {
        if let Some(tunnel) = self.tunnels.write().await.remove(tunnel_id) {
            tunnel.close();
            tracing::info!(tunnel = tunnel.short_id(), "tunnel unregistered");
        }
    }

    /// Shutdown fan-out: fire done on every tunnel and empty the map.
    /// Writers observe done, exit, and close their sockets.
    pub async fn close_all(&self) {
        let mut tunnels = self.tunnels.write().await;
        for (_, tunnel) in tunnels.drain() {
            tunnel.close();
        }
    }

    pub fn store(&self) -> &Arc<RequestStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_MAX_REQUESTS;

    fn registry() -> TunnelRegistry {
        TunnelRegistry::new(Arc::new(RequestStore::new(DEFAULT_MAX_REQUESTS)))
    }

    #[tokio::test]
    async fn register_assigns_fresh_ids_and_ignores_requests() {
        let registry = registry();

        let (first, _rx1) = registry.register(Some("my-project")).await;
        let (second, _rx2) = registry.register(Some("my-project")).await;

        assert_ne!(first.id(), "my-project");
        assert_ne!(second.id(), "my-project");
        assert_ne!(first.id(), second.id());
        assert!(registry.get(first.id()).await.is_some());
        assert!(registry.get(second.id()).await.is_some());
    }

    #[tokio::test]
    async fn unregister_fires_done_and_removes_the_entry() {
        let registry = registry();
        let (tunnel, _rx) = registry.register(None).await;

        registry.unregister(tunnel.id()).await;

        assert!(tunnel.is_closed());
        assert!(registry.get(tunnel.id()).await.is_none());

        // Unregistering an unknown id is a no-op.
        registry.unregister("gone").await;
    }

    #[tokio::test]
    async fn close_all_sweeps_every_tunnel() {
        let registry = registry();
        let (a, _rx_a) = registry.register(None).await;
        let (b, _rx_b) = registry.register(None).await;

        registry.close_all().await;

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.get(a.id()).await.is_none());
        assert!(registry.get(b.id()).await.is_none());
    }
}
