//! Broadcast protocol payloads.
//!
//! The broadcast protocol carries play state and cue files from an upstream
//! node (the data holder) to downstream consumers. It is designed for
//! multiple hops: a node may be downstream of one server and upstream of
//! its own consumers.

use serde::{Deserialize, Serialize};

use crate::file::CueFile;
use crate::message::{PingProtocol, Protocol};

/// WebSocket path on which an upstream accepts downstream connections.
pub const BROADCAST_UPSTREAM_WEBSOCKET_PATH: &str = "/listen";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastRequest {
    Ping,
    File {
        #[serde(rename = "fileHash")]
        file_hash: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastResponse {
    Pong {
        #[serde(rename = "timestampMillis")]
        timestamp_millis: f64,
    },
    File { file: CueFile },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastNotification {
    /// Upstream → downstream. Times are on the sender's clock.
    PlayingState { data: PlayStateData },
    /// Downstream → upstream report of its accepted clock sample.
    Ping { ping: f64, diff: f64 },
}

/// Playback of one layer of media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    pub file_hash: String,
    pub effective_start_time_millis: f64,
    /// 1 = full volume, 0 = muted.
    pub amplitude: f64,
    /// Speed relative to natural speed: 1 = normal, 2 = double, 0.5 = half.
    pub play_speed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayStateData {
    pub layers: Vec<LayerState>,
}

impl PlayStateData {
    /// Shift every layer's start time by `diff` milliseconds.
    pub fn shifted(&self, diff: f64) -> Self {
        Self {
            layers: self
                .layers
                .iter()
                .map(|layer| LayerState {
                    effective_start_time_millis: layer.effective_start_time_millis + diff,
                    ..layer.clone()
                })
                .collect(),
        }
    }
}

/// Marker for the broadcast protocol.
#[derive(Debug, Clone, Copy)]
pub struct Broadcast;

impl Protocol for Broadcast {
    const NAME: &'static str = "broadcast";

    type Request = BroadcastRequest;
    type Response = BroadcastResponse;
    type Notification = BroadcastNotification;
}

impl PingProtocol for Broadcast {
    fn ping_request() -> BroadcastRequest {
        BroadcastRequest::Ping
    }

    fn pong_timestamp(response: &BroadcastResponse) -> Option<f64> {
        match response {
            BroadcastResponse::Pong { timestamp_millis } => Some(*timestamp_millis),
            _ => None,
        }
    }
}
