//! Hookshot - a self-hostable webhook relay for local development
//!
//! Usage:
//!   hookshot server              Run the relay server
//!   hookshot client              Connect and forward webhooks to localhost
//!   hookshot requests            List recent requests for a tunnel
//!   hookshot replay              Re-issue a stored request

mod client;
mod commands;
mod config;
mod tui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hookshot")]
#[command(version)]
#[command(about = "A self-hostable webhook relay for local development")]
#[command(long_about = "Hookshot forwards webhooks from a public relay server to your \
local machine.\n\nRun 'hookshot server' on your VPS, then 'hookshot client' locally \
to receive webhooks at localhost.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Public URL prefix advertised to clients
        #[arg(long = "public-url")]
        public_url: Option<String>,

        /// Maximum requests to store per tunnel
        #[arg(long = "max-requests")]
        max_requests: Option<usize>,

        /// Require this token from clients and API callers
        #[arg(long)]
        token: Option<String>,

        /// Path to a TLS certificate (PEM)
        #[arg(long = "tls-cert")]
        tls_cert: Option<PathBuf>,

        /// Path to the matching TLS private key (PEM)
        #[arg(long = "tls-key")]
        tls_key: Option<PathBuf>,

        /// Path to a config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Connect to a relay server and forward webhooks to a local target
    Client {
        /// Server URL (e.g. https://relay.example.com)
        #[arg(short, long)]
        server: Option<String>,

        /// Local target URL
        #[arg(short, long)]
        target: Option<String>,

        /// Requested tunnel id (advisory; the server assigns its own)
        #[arg(long)]
        id: Option<String>,

        /// Auth token
        #[arg(long)]
        token: Option<String>,

        /// Show request and response bodies
        #[arg(short, long)]
        verbose: bool,

        /// Run with the interactive terminal UI
        #[arg(long)]
        tui: bool,

        /// Path to a config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List recent requests for a tunnel
    Requests {
        /// Server URL
        #[arg(short, long)]
        server: String,

        /// Tunnel id
        #[arg(long)]
        tunnel: String,

        /// Auth token
        #[arg(long)]
        token: Option<String>,
    },

    /// Replay a previous request
    Replay {
        /// Server URL
        #[arg(short, long)]
        server: String,

        /// Tunnel id
        #[arg(long)]
        tunnel: String,

        /// Request id to replay
        #[arg(short, long)]
        request: String,

        /// Auth token
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            host,
            public_url,
            max_requests,
            token,
            tls_cert,
            tls_key,
            config,
        } => {
            init_tracing("info", true);
            let file = config::load(config.as_deref())?;
            let server_config = file.server.merged(config::ServerFlags {
                port,
                host,
                public_url,
                max_requests,
                token,
                tls_cert,
                tls_key,
            });
            hookshot_server::run(server_config).await
        }

        Commands::Client {
            server,
            target,
            id,
            token,
            verbose,
            tui,
            config,
        } => {
            let filter = if tui {
                "error"
            } else if verbose {
                "debug,hyper=info,tungstenite=info"
            } else {
                "info"
            };
            init_tracing(filter, false);

            let file = config::load(config.as_deref())?;
            let opts = file.client.merged(config::ClientFlags {
                server,
                target,
                id,
                token,
                verbose,
            })?;
            run_client(opts, tui).await
        }

        Commands::Requests {
            server,
            tunnel,
            token,
        } => {
            init_tracing("warn", false);
            commands::requests::run(&server, &tunnel, token.as_deref()).await
        }

        Commands::Replay {
            server,
            tunnel,
            request,
            token,
        } => {
            init_tracing("warn", false);
            commands::replay::run(&server, &tunnel, &request, token.as_deref()).await
        }
    }
}

async fn run_client(opts: client::ClientOptions, tui_mode: bool) -> Result<()> {
    if tui_mode {
        let replay = tui::ReplayContext::new(&opts.server_url, opts.token.clone())?;
        let (events_tx, events_rx) = mpsc::channel(100);

        let mut tunnel_client = client::Client::new(opts)?;
        tunnel_client.set_event_channel(events_tx);
        let tunnel_client = Arc::new(tunnel_client);

        let runner = {
            let tunnel_client = tunnel_client.clone();
            tokio::spawn(async move { tunnel_client.run().await })
        };

        // The TUI owns the terminal until the user quits.
        let result = tui::run(events_rx, replay).await;
        runner.abort();
        result
    } else {
        cliclack::intro(console::style(" hookshot ").on_cyan().black().to_string())?;
        let tunnel_client = client::Client::new(opts)?;
        tokio::select! {
            result = tunnel_client.run() => result,
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                Ok(())
            }
        }
    }
}

fn init_tracing(default_filter: &str, with_time: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if with_time {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().without_time())
            .init();
    }
}
