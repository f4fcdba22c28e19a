//! Hookshot Server - the relay side of the webhook tunnel
//!
//! Accepts tunnel WebSockets from clients, receives public webhook traffic,
//! forwards it through the matching tunnel, and keeps a bounded in-memory
//! history for listing and replay.

pub mod config;
pub mod registry;
pub mod routes;
pub mod store;
pub mod tls;
pub mod tunnel;

pub use config::Config;

use crate::registry::TunnelRegistry;
use crate::routes::AppState;
use crate::store::RequestStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// How long in-flight handlers get to drain after the shutdown signal
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Run the relay server until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let store = Arc::new(RequestStore::new(config.max_requests));
    let registry = Arc::new(TunnelRegistry::new(store.clone()));
    let state = AppState {
        config: Arc::new(config),
        registry: registry.clone(),
        store,
    };

    let app = routes::router(state.clone());

    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid bind address: {err}"))?;
    let listener = TcpListener::bind(addr).await?;

    if let Some(public_url) = &state.config.public_url {
        tracing::info!("public URL: {}", public_url);
    }
    if state.config.token.is_some() {
        tracing::info!("auth token required for connections");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    if let (Some(cert), Some(key)) = (
        state.config.tls_cert.clone(),
        state.config.tls_key.clone(),
    ) {
        tracing::info!("hookshot server listening on {} (TLS)", addr);
        let tls_config = tls::load_server_config(&cert, &key)?;
        tls::serve(listener, tls_config, app, shutdown_rx, registry).await
    } else {
        tracing::info!("hookshot server listening on {}", addr);

        let graceful = {
            let registry = registry.clone();
            let mut shutdown = shutdown_rx.clone();
            async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                tracing::info!("shutting down, closing tunnels");
                registry.close_all().await;
            }
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(graceful);

        // Cap the drain: tunnels drop immediately on close_all, so this only
        // bites when a webhook caller is slow to go away.
        let mut shutdown = shutdown_rx.clone();
        let drain_cap = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        };

        tokio::select! {
            served = server => served.map_err(Into::into),
            _ = drain_cap => {
                tracing::warn!("drain deadline reached");
                Ok(())
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
