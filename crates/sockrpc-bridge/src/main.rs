//! sockrpc bridge: entry point.
//!
//! This binary serves an RPC backend over persistent WebSocket sessions.  A
//! client connects, sends a connection message (a JSON object of header
//! values), and once admitted sends JSON requests on the session's main
//! channel; every request is answered with the backend's status and body.
//!
//! The backend wired in here is the demonstration [`EchoBackend`], which
//! admits sessions by bearer token and echoes requests back.
//!
//! # Usage
//!
//! ```text
//! sockrpc-bridge [OPTIONS]
//!
//! Options:
//!   --bind <ADDR>                          Listen address [default: 0.0.0.0:24810]
//!   --namespace <PATH>                     WebSocket mount path [default: /rpc]
//!   --connection-message-timeout <SECS>    Handshake timeout [default: 10]
//!   --auth-token <TOKEN>                   Required bearer token [default: none]
//!   --config <FILE>                        TOML configuration file
//! ```
//!
//! # Configuration precedence
//!
//! Command-line flags and environment variables win over the TOML file, which
//! wins over the built-in defaults.
//!
//! | Variable                               | Flag                             |
//! |----------------------------------------|----------------------------------|
//! | `SOCKRPC_BIND`                         | `--bind`                         |
//! | `SOCKRPC_NAMESPACE`                    | `--namespace`                    |
//! | `SOCKRPC_CONNECTION_MESSAGE_TIMEOUT`   | `--connection-message-timeout`   |
//! | `SOCKRPC_AUTH_TOKEN`                   | `--auth-token`                   |
//! | `SOCKRPC_CONFIG`                       | `--config`                       |
//!
//! # Architecture overview
//!
//! ```text
//! WebSocket client  (JSON envelopes)
//!       ↕
//! sockrpc-bridge  ← this process
//!   domain/          BridgeConfig
//!   application/     handshake, admission supervisor, request handler
//!   infrastructure/  WsTransport, EchoBackend
//!       ↕
//! RPC backend  (Backend / Connection traits)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sockrpc_bridge::domain::{BridgeConfig, FileConfig};
use sockrpc_bridge::infrastructure::{EchoBackend, WsTransport};
use sockrpc_bridge::Bridge;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// sockrpc bridge.
///
/// Accepts WebSocket sessions, authorizes them with a connection handshake,
/// and forwards their requests to the backend.
#[derive(Debug, Parser)]
#[command(
    name = "sockrpc-bridge",
    about = "Serve an RPC backend over persistent WebSocket sessions",
    version
)]
struct Cli {
    /// Address the WebSocket server listens on.
    ///
    /// Use `0.0.0.0:PORT` to accept sessions on every interface, or
    /// `127.0.0.1:PORT` to accept only local clients.  Defaults to
    /// `0.0.0.0:24810`.
    #[arg(long, env = "SOCKRPC_BIND")]
    bind: Option<SocketAddr>,

    /// Path WebSocket upgrades are accepted under.
    ///
    /// Upgrade requests for any other path are refused with HTTP 404.  The
    /// value is normalized to a leading `/` without a trailing one, so `rpc/`
    /// and `/rpc` are the same; `/` accepts every path.  Defaults to `/rpc`.
    #[arg(long, env = "SOCKRPC_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds a new socket has to send its connection message.
    ///
    /// A client that connects but stays silent for longer is disconnected
    /// without ever reaching the backend.  Must be greater than zero;
    /// defaults to 10.
    #[arg(long, env = "SOCKRPC_CONNECTION_MESSAGE_TIMEOUT")]
    connection_message_timeout: Option<u64>,

    /// Bearer token required in the `authorization` connection header.
    ///
    /// Clients must send `{"authorization":"Bearer <TOKEN>"}` as their
    /// connection message; anything else is answered with a 401 rejection.
    /// When unset, every session is admitted.
    #[arg(long, env = "SOCKRPC_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// TOML configuration file.
    ///
    /// Values in the file replace the built-in defaults; flags and
    /// environment variables given alongside it replace the file's values.
    #[arg(long, env = "SOCKRPC_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Merges defaults, the optional config file, and the flags into a
    /// validated [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration is invalid.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = BridgeConfig::default();

        if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let file = FileConfig::from_toml_str(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            config = config.with_file(file);
        }

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if let Some(secs) = self.connection_message_timeout {
            config.connection_message_timeout = Duration::from_secs(secs);
        }
        if self.auth_token.is_some() {
            config.auth_token = self.auth_token;
        }

        config.validate()?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised; `RUST_LOG` selects the level and
///    falls back to `info`.
/// 2. CLI arguments, environment variables, and the config file are merged
///    into a [`BridgeConfig`].
/// 3. The listener is bound and the [`WsTransport`] accept loop is started.
/// 4. A [`Bridge`] connects the transport to the [`EchoBackend`].
/// 5. On Ctrl+C the bridge is released, which also stops the accept loop.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Parse CLI arguments ───────────────────────────────────────────────────
    //
    // Flags and `SOCKRPC_*` variables are layered over the config file and
    // the defaults, then validated.  A bad value stops the process here,
    // before anything is bound.
    let config = Cli::parse().into_bridge_config()?;

    info!(
        "sockrpc bridge starting on {} (namespace {:?}, auth {})",
        config.bind_addr,
        config.namespace,
        if config.auth_token.is_some() { "token" } else { "none" }
    );

    // ── Transport ─────────────────────────────────────────────────────────────
    //
    // The listener is bound up front so an address already in use is
    // reported as a startup error.  The accept loop then runs on its own task
    // and hands every upgraded socket to whatever callback the bridge
    // registers.
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;
    let transport = WsTransport::new(&config.namespace);
    let mut server = tokio::spawn(Arc::clone(&transport).serve(listener));

    // ── Bridge ────────────────────────────────────────────────────────────────
    //
    // `Bridge::new` registers the new-socket callback on the transport and
    // starts the admission loop.  From here on every accepted socket gets a
    // handshake against the backend.
    let backend = Arc::new(EchoBackend::new(config.auth_token.clone()));
    let bridge = Bridge::new(transport, backend, &config);

    // ── Wait for shutdown ─────────────────────────────────────────────────────
    //
    // Either Ctrl+C or the accept loop ending (for example on a listener
    // error) stops the process.  Both paths release the bridge first so no
    // new sessions are admitted while the accept loop winds down.
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received Ctrl+C; shutting down"),
                Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
            }
            bridge.release().await;
            server.await.context("accept loop panicked")??;
        }
        finished = &mut server => {
            bridge.release().await;
            finished.context("accept loop panicked")??;
        }
    }

    info!("sockrpc bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
