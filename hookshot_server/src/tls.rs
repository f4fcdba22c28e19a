//! TLS termination for the relay listener.
//!
//! Each accepted connection completes a rustls handshake and is then served
//! by the axum router over hyper, with upgrade support so tunnel WebSockets
//! work over TLS.

use anyhow::Context;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio::sync::watch;

use crate::registry::TunnelRegistry;
use crate::SHUTDOWN_GRACE;

pub fn load_server_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<ServerConfig> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("failed to open TLS certificate {}", cert_path.display()))?,
    ))
    .collect::<Result<_, _>>()
    .context("failed to parse TLS certificate")?;

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key_path)
            .with_context(|| format!("failed to open TLS key {}", key_path.display()))?,
    ))
    .context("failed to parse TLS key")?
    .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS certificate/key pair")
}

/// Accept loop with graceful shutdown: on the shutdown signal, stop
/// accepting, sweep the registry, and give in-flight connections the
/// drain grace before returning.
pub async fn serve(
    listener: TcpListener,
    tls_config: ServerConfig,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
    registry: Arc<TunnelRegistry>,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let app = app.clone();
                connections.spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            tracing::debug!(peer = %peer, error = %err, "TLS handshake failed");
                            return;
                        }
                    };
                    let service = TowerToHyperService::new(app);
                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!(peer = %peer, error = %err, "connection error");
                    }
                });
            }
            // Reap finished connections so the set does not grow unbounded.
            Some(_) = connections.join_next() => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }

    tracing::info!("shutting down, closing tunnels");
    registry.close_all().await;

    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("drain deadline reached");
    }

    Ok(())
}
