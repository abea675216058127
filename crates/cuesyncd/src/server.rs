//! HTTP and WebSocket surface of the daemon.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use cuesync_core::broadcast::{PlayStateData, BROADCAST_UPSTREAM_WEBSOCKET_PATH};
use cuesync_core::control::{ControlRequest, CONTROLLER_WEBSOCKET_PATH};
use cuesync_core::metadata::ConnectionMetadataNotification;
use cuesync_protocol::broadcast::UpstreamEndpoint;
use cuesync_protocol::control::ServerEndpoint;
use cuesync_protocol::{ConnectionMetadataManager, CueStore, EndpointOptions};

use crate::files::{DaemonFiles, ParentLink};
use crate::hub::Hub;
use crate::transport;

#[derive(Clone)]
pub struct AppState {
    pub name: String,
    pub hub: Hub,
    pub store: CueStore,
    pub files: Arc<DaemonFiles>,
    pub parent: ParentLink,
    pub metadata: ConnectionMetadataManager,
    pub options: EndpointOptions,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(BROADCAST_UPSTREAM_WEBSOCKET_PATH, get(handle_listen))
        .route(CONTROLLER_WEBSOCKET_PATH, get(handle_control))
        .route("/status", get(handle_status))
        .route("/nodes", get(handle_nodes))
        .route("/command", post(handle_command))
        .with_state(state)
        .layer(cors)
}

pub async fn serve(state: AppState, addr: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("{addr}:{port}")).await?;
    tracing::info!(addr, port, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ── /listen ──────────────────────────────────────────────────────────────────

async fn handle_listen(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_downstream(socket, state))
}

async fn serve_downstream(socket: WebSocket, state: AppState) {
    let (outbound, mut incoming) = transport::pump(socket);
    let endpoint = Arc::new(UpstreamEndpoint::new(outbound, state.files.clone(), &state.options));
    tracing::info!(endpoint = %endpoint.id(), "downstream connected");
    state.hub.add_downstream(endpoint.clone());

    while let Some(frame) = incoming.recv().await {
        endpoint.receive(&frame);
    }

    state.hub.remove_downstream(endpoint.id());
    endpoint.closed();
}

// ── /control ─────────────────────────────────────────────────────────────────

async fn handle_control(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_controller(socket, state))
}

async fn serve_controller(socket: WebSocket, state: AppState) {
    let (outbound, mut incoming) = transport::pump(socket);
    let endpoint = Arc::new(ServerEndpoint::new(outbound, &state.options));
    let id = endpoint.id();
    tracing::info!(endpoint = %id, "controller connected");
    state.hub.add_controller(endpoint.clone());

    let mut states = endpoint.subscribe();
    loop {
        tokio::select! {
            frame = incoming.recv() => match frame {
                Some(frame) => endpoint.receive(&frame),
                None => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let control = states.borrow_and_update().clone();
                state.hub.controller_state(id, control);
            }
        }
    }

    endpoint.closed();
    state.hub.remove_controller(id);
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub node: NodeInfo,
    pub downstreams: Vec<PeerClock>,
    pub controllers: usize,
    /// Present while relaying from a parent.
    pub upstream: Option<PeerClock>,
    pub files: usize,
    pub nodes_known: usize,
    pub state: PlayStateData,
}

#[derive(Serialize)]
pub struct NodeInfo {
    pub uuid: String,
    pub name: String,
}

#[derive(Serialize)]
pub struct PeerClock {
    pub endpoint: String,
    pub ping_ms: Option<f64>,
    pub diff_ms: Option<f64>,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let downstreams = state
        .hub
        .downstreams()
        .iter()
        .map(|d| {
            let ping = d.downstream_ping();
            PeerClock {
                endpoint: d.id().to_string(),
                ping_ms: ping.map(|p| p.ping),
                diff_ms: ping.map(|p| p.diff),
            }
        })
        .collect();

    let upstream = state.parent.get().map(|parent| {
        let sample = parent.latest_ping();
        PeerClock {
            endpoint: parent.id().to_string(),
            ping_ms: sample.map(|s| s.ping),
            diff_ms: sample.map(|s| s.diff),
        }
    });

    Json(StatusResponse {
        node: NodeInfo {
            uuid: state.metadata.self_uuid(),
            name: state.name.clone(),
        },
        downstreams,
        controllers: state.hub.controller_count(),
        upstream,
        files: state.store.len(),
        nodes_known: state.metadata.snapshot().nodes.len(),
        state: state.hub.current_state(),
    })
}

// ── /nodes ───────────────────────────────────────────────────────────────────

async fn handle_nodes(State(state): State<AppState>) -> Json<ConnectionMetadataNotification> {
    Json(state.metadata.snapshot())
}

// ── /command ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CommandResponse {
    pub success: bool,
}

async fn handle_command(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<CommandResponse>, (StatusCode, String)> {
    match state.hub.send_control(request).await {
        Ok(success) => Ok(Json(CommandResponse { success })),
        Err(e) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}
