//! # haven-server
//!
//! Relay server binary for Haven.
//!
//! This binary provides:
//! - **WebSocket relay** (axum) carrying the JSON event protocol:
//!   sessions, communities, channel and direct messages, friendships,
//!   notifications, and voice signalling
//! - **JSON snapshot persistence** so communities, history, and
//!   identities survive restarts
//! - **Health endpoint** exposing live routing counters

mod api;
mod config;
mod persist;
mod ws;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use haven_core::{router, NoPersist, Persist, Router};
use haven_store::JsonFileStore;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::persist::StorePersist;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,haven_server=debug,haven_core=debug")),
        )
        .init();

    info!("Starting Haven server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // Restore state and wire up persistence. Memory-only mode skips the
    // store entirely.
    let (snapshot, persist): (_, Box<dyn Persist>) = if config.persist {
        let store = match &config.data_dir {
            Some(dir) => JsonFileStore::open_at(dir)?,
            None => JsonFileStore::open_default()?,
        };
        let snapshot = store.load_snapshot()?;
        (snapshot, Box::new(StorePersist::spawn(Arc::new(store))))
    } else {
        info!("persistence disabled, running memory-only");
        (Default::default(), Box::new(NoPersist))
    };

    let mut relay = Router::from_snapshot(snapshot, persist);
    relay.ensure_default_community();
    let stats = relay.stats();
    info!(
        instance = %config.instance_name,
        communities = stats.communities,
        identities = stats.identities,
        "state restored"
    );

    let (commands, command_rx) = mpsc::unbounded_channel();
    tokio::spawn(router::run(relay, command_rx));

    let app = api::build_router(AppState {
        commands: commands.clone(),
    });
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
