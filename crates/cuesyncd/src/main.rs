//! cuesyncd: serves play state and cue files to downstream nodes, accepts
//! controllers, and optionally relays from a parent upstream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use cuesync_core::clock::system_clock;
use cuesync_core::config::CuesyncConfig;
use cuesync_protocol::{ConnectionMetadataManager, CueStore, EndpointOptions};

mod files;
mod hub;
mod relay;
mod server;
mod transport;

use files::{DaemonFiles, ParentLink};
use hub::Hub;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CuesyncConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CuesyncConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CuesyncConfig::default()
    });
    tracing::info!(name = %config.node.name, "cuesyncd starting");

    // Cue files
    let store = CueStore::new();
    match store.load_dir(&config.storage.cue_dir) {
        Ok(count) => tracing::info!(count, dir = %config.storage.cue_dir.display(), "cue files loaded"),
        Err(e) => tracing::warn!(error = %e, "no cue files loaded"),
    }

    // Shared state
    let metadata = ConnectionMetadataManager::with_clock(
        Some(&config.node.name),
        system_clock(),
        config.protocol.metadata_liveness(),
    );
    tracing::info!(uuid = %metadata.self_uuid(), "node identity");
    let options = EndpointOptions::from_config(&config.protocol).with_metadata(metadata.clone());
    let parent = ParentLink::default();
    let files = Arc::new(DaemonFiles::new(store.clone(), parent.clone()));
    let hub = Hub::new(store.clone());

    // ── Shutdown ─────────────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    let relay_task = config.upstream_url().map(|url| {
        tracing::info!(url, "relaying from parent upstream");
        tokio::spawn(relay::relay_loop(
            url.to_string(),
            hub.clone(),
            parent.clone(),
            options.clone(),
            shutdown_tx.subscribe(),
        ))
    });

    let server_task = {
        let state = server::AppState {
            name: config.node.name.clone(),
            hub,
            store,
            files,
            parent,
            metadata,
            options,
        };
        let addr = config.network.listen_addr.clone();
        let port = config.network.port;
        tokio::spawn(async move { server::serve(state, &addr, port).await })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = server_task        => tracing::error!("server exited: {:?}", r),
    }

    let _ = shutdown_tx.send(());
    if let Some(task) = relay_task {
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }

    Ok(())
}
