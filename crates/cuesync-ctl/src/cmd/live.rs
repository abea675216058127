//! Commands that join the daemon as a broadcast downstream over `/listen`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use cuesync_core::broadcast::BROADCAST_UPSTREAM_WEBSOCKET_PATH;
use cuesync_core::clock::{Clock, SystemClock};
use cuesync_protocol::broadcast::DownstreamEndpoint;
use cuesync_protocol::{client, ConnectionMetadataManager, EndpointOptions};

use super::http::ws_url;
use super::status::{print_nodes, print_state};
use super::Target;

const FILE_TIMEOUT: Duration = Duration::from_secs(10);

struct Session {
    downstream: Arc<DownstreamEndpoint>,
    /// Finishes when the daemon hangs up.
    pump: JoinHandle<()>,
}

async fn open(target: &Target, options: &EndpointOptions) -> Result<Session> {
    let url = ws_url(target, BROADCAST_UPSTREAM_WEBSOCKET_PATH);
    let (outbound, mut incoming) = client::connect(&url)
        .await
        .with_context(|| format!("failed to connect to cuesyncd at {}, is it running?", url))?;

    let downstream = Arc::new(DownstreamEndpoint::new(outbound, options));
    let pump = {
        let downstream = downstream.clone();
        tokio::spawn(async move {
            while let Some(frame) = incoming.recv().await {
                downstream.receive(&frame);
            }
            downstream.closed();
            downstream.endpoint().reject_all_pending();
        })
    };

    Ok(Session { downstream, pump })
}

pub async fn cmd_watch(target: &Target) -> Result<()> {
    let mut session = open(target, &EndpointOptions::default()).await?;
    let mut states = session.downstream.subscribe();
    println!("Waiting for the first clock sample and play state (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if let Some(state) = state {
                    let diff = session.downstream.latest_ping().map(|s| s.diff).unwrap_or(0.0);
                    println!("───────────────────────────────────────");
                    println!("  clock diff : {:.1}ms", diff);
                    print_state(&state, Some(SystemClock.now_millis()));
                }
            }
            _ = &mut session.pump => {
                println!("Connection closed by cuesyncd.");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

pub async fn cmd_nodes(target: &Target) -> Result<()> {
    let manager = ConnectionMetadataManager::new(Some("cuesync-ctl"));
    let options = EndpointOptions::default().with_metadata(manager.clone());
    let mut session = open(target, &options).await?;
    let mut listener = manager.add_listener();

    loop {
        tokio::select! {
            snapshot = listener.receiver.recv() => match snapshot {
                Some(snapshot) => print_nodes(&snapshot),
                None => break,
            },
            _ = &mut session.pump => {
                println!("Connection closed by cuesyncd.");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.remove_listener(listener.id);
    Ok(())
}

pub async fn cmd_file(target: &Target, hash: &str) -> Result<()> {
    let session = open(target, &EndpointOptions::default()).await?;
    let file = tokio::time::timeout(FILE_TIMEOUT, session.downstream.get_file(hash))
        .await
        .context("timed out waiting for the file")??;
    println!("{}", serde_json::to_string_pretty(&file)?);
    session.pump.abort();
    Ok(())
}
