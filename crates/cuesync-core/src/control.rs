//! Control protocol payloads.
//!
//! The control protocol lets a source such as a music player tell the
//! server what is playing. The controller and the server are expected to
//! run on the same machine, but each still has its own notion of time, so
//! the server keeps a clock offset to the controller.

use serde::{Deserialize, Serialize};

use crate::message::{PingProtocol, Protocol};

/// WebSocket path on which the server accepts controllers.
pub const CONTROLLER_WEBSOCKET_PATH: &str = "/control";

/// Requests sent by the server to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "kebab-case")]
pub enum ControlRequest {
    Ping,
    Toggle,
    Pause,
    GoToTime {
        #[serde(rename = "positionMillis")]
        position_millis: f64,
    },
    PlaySpeed {
        #[serde(rename = "playSpeed")]
        play_speed: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Pong {
        #[serde(rename = "timestampMillis")]
        timestamp_millis: f64,
    },
    Result { success: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlNotification {
    State { data: ControlPlayState },
}

/// How the controller identifies the media a layer is playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaFile {
    Path {
        path: String,
    },
    Meta {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artist: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        album: Option<String>,
        #[serde(rename = "lengthMillis")]
        length_millis: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlLayerState {
    Playing {
        #[serde(rename = "effectiveStartTimeMillis")]
        effective_start_time_millis: f64,
        #[serde(rename = "playSpeed")]
        play_speed: f64,
    },
    Paused {
        #[serde(rename = "positionMillis")]
        position_millis: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlLayer {
    pub file: MediaFile,
    pub state: ControlLayerState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPlayState {
    pub layers: Vec<ControlLayer>,
}

impl ControlPlayState {
    /// Shift every playing layer's start time by `diff`. Paused layers carry
    /// a position, not a time, and are left alone.
    pub fn shifted(&self, diff: f64) -> Self {
        Self {
            layers: self
                .layers
                .iter()
                .map(|layer| ControlLayer {
                    file: layer.file.clone(),
                    state: match layer.state {
                        ControlLayerState::Playing {
                            effective_start_time_millis,
                            play_speed,
                        } => ControlLayerState::Playing {
                            effective_start_time_millis: effective_start_time_millis + diff,
                            play_speed,
                        },
                        paused => paused,
                    },
                })
                .collect(),
        }
    }
}

/// Marker for the control protocol.
#[derive(Debug, Clone, Copy)]
pub struct Control;

impl Protocol for Control {
    const NAME: &'static str = "control";

    type Request = ControlRequest;
    type Response = ControlResponse;
    type Notification = ControlNotification;
}

impl PingProtocol for Control {
    fn ping_request() -> ControlRequest {
        ControlRequest::Ping
    }

    fn pong_timestamp(response: &ControlResponse) -> Option<f64> {
        match response {
            ControlResponse::Pong { timestamp_millis } => Some(*timestamp_millis),
            ControlResponse::Result { .. } => None,
        }
    }
}
