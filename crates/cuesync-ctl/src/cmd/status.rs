//! Daemon status and node-graph commands, plus the shared printers.

use anyhow::Result;
use serde::Deserialize;

use cuesync_core::broadcast::PlayStateData;
use cuesync_core::metadata::ConnectionMetadataNotification;

use super::http::{base_url, get_json};
use super::Target;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    node: NodeInfo,
    downstreams: Vec<PeerClock>,
    controllers: usize,
    upstream: Option<PeerClock>,
    files: usize,
    nodes_known: usize,
    state: PlayStateData,
}

#[derive(Deserialize)]
struct NodeInfo {
    uuid: String,
    name: String,
}

#[derive(Deserialize)]
struct PeerClock {
    endpoint: String,
    ping_ms: Option<f64>,
    diff_ms: Option<f64>,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(target: &Target) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(target))).await?;

    println!("═══════════════════════════════════════");
    println!("  cuesync Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Node          : {} ({})", resp.node.name, short(&resp.node.uuid));
    println!("  Cue files     : {}", resp.files);
    println!("  Known nodes   : {}", resp.nodes_known);
    println!("  Controllers   : {}", resp.controllers);
    println!("  Downstreams   : {}", resp.downstreams.len());

    match &resp.upstream {
        Some(parent) => {
            println!("\n  Upstream:");
            print_peer(parent);
        }
        None => println!("\n  No parent upstream."),
    }

    if !resp.downstreams.is_empty() {
        println!("\n  Downstreams:");
        for d in &resp.downstreams {
            print_peer(d);
        }
    }

    println!();
    print_state(&resp.state, None);
    Ok(())
}

pub async fn cmd_node_list(target: &Target) -> Result<()> {
    let snapshot: ConnectionMetadataNotification =
        get_json(&format!("{}/nodes", base_url(target))).await?;
    print_nodes(&snapshot);
    Ok(())
}

// ── Printers ──────────────────────────────────────────────────────────────────

fn print_peer(peer: &PeerClock) {
    println!("  ┌─ {}", peer.endpoint);
    println!("  │  ping : {}", millis(peer.ping_ms));
    println!("  └─ diff : {}", millis(peer.diff_ms));
}

pub fn print_nodes(snapshot: &ConnectionMetadataNotification) {
    println!("═══════════════════════════════════════");
    println!("  Nodes ({})", snapshot.nodes.len());
    println!("═══════════════════════════════════════");

    let mut nodes: Vec<_> = snapshot.nodes.iter().collect();
    nodes.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.uuid.cmp(&b.uuid)));

    for n in nodes {
        let marker = if n.uuid == snapshot.own_uuid { " (self)" } else { "" };
        println!("  ┌─ {}{}", short(&n.uuid), marker);
        println!("  │  name     : {}", n.name.as_deref().unwrap_or("-"));
        println!("  │  distance : {}", n.distance);
        println!("  │  listens  : {}", n.wants_metadata);
        for (kind, connections) in &n.connections {
            let peers = connections
                .iter()
                .map(|c| {
                    let uuid = c.uuid.as_deref().map(short).unwrap_or("?");
                    match c.last_ping {
                        Some(ping) => format!("{uuid} {ping}ms"),
                        None => uuid.to_string(),
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            println!("  │  {:<9}: [{}]", kind, peers);
        }
        println!("  └─ updated  : {}", n.last_update_millis);
    }
}

/// `now` is the local wall clock; when given, each layer's position is shown.
pub fn print_state(state: &PlayStateData, now: Option<f64>) {
    if state.layers.is_empty() {
        println!("  Nothing playing.");
        return;
    }
    println!("  Playing ({} layers):", state.layers.len());
    for layer in &state.layers {
        println!("  ┌─ {}", short(&layer.file_hash));
        println!("  │  start     : {:.1}", layer.effective_start_time_millis);
        println!("  │  amplitude : {:.2}", layer.amplitude);
        match now {
            Some(now) => {
                println!("  │  speed     : {:.2}", layer.play_speed);
                let position = (now - layer.effective_start_time_millis) * layer.play_speed;
                println!("  └─ position  : {:.0}ms", position);
            }
            None => println!("  └─ speed     : {:.2}", layer.play_speed),
        }
    }
}

fn millis(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}ms")).unwrap_or_else(|| "-".to_string())
}

fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
