//! Envelope types shared by every protocol.
//!
//! Every frame on the wire is one JSON object tagged by `"type"`:
//!
//! ```text
//! {"type":"request","requestId":<int>,"request":<payload>}
//! {"type":"response","requestId":<int>,"response":<payload>}
//! {"type":"error_response","requestId":<int>,"message":<string>}
//! {"type":"notification","notification":<payload>}
//! ```
//!
//! Field names are part of the compatibility surface. Payloads are opaque at
//! this level; a [`Protocol`] binds them to concrete types.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::metadata::ConnectionMetadataNotification;

/// Correlates a request with its response. Unique per direction per
/// connection while outstanding, reusable once resolved.
pub type RequestId = u32;

/// One frame of the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message<Req, Res, Notif> {
    /// Expects exactly one matching `Response` or `ErrorResponse`.
    Request {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        request: Req,
    },
    /// Resolves the pending request with the same id.
    Response {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        response: Res,
    },
    /// Rejects the pending request with the same id. Carries only a string.
    ErrorResponse {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        message: String,
    },
    /// Fire-and-forget, no id.
    Notification { notification: Notif },
}

/// A frame whose payloads have not been interpreted yet.
///
/// Endpoints decode in two steps so that a bad payload can still be answered
/// (requests) or matched to its pending slot (responses).
pub type RawMessage = Message<serde_json::Value, serde_json::Value, serde_json::Value>;

impl RawMessage {
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

impl<Req: Serialize, Res: Serialize, Notif: Serialize> Message<Req, Res, Notif> {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Discriminator of the gossip payload.
pub const CONNECTION_METADATA: &str = "connection-metadata";

/// Notification payloads owned by the protocol layer itself.
///
/// Recognised on every connection even though no application notification
/// type declares them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReservedNotification {
    #[serde(rename = "connection-metadata")]
    ConnectionMetadata(ConnectionMetadataNotification),
}

impl ReservedNotification {
    /// Does this raw notification payload carry a reserved discriminator?
    pub fn is_reserved(payload: &serde_json::Value) -> bool {
        payload.get("type").and_then(|t| t.as_str()) == Some(CONNECTION_METADATA)
    }

    /// Encode as a complete notification frame, independent of any protocol.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Message::<(), (), &ReservedNotification>::Notification { notification: self }.to_frame()
    }
}

/// Binds a protocol marker to the payload types it exchanges.
///
/// The same three types are used in both directions; each side simply never
/// sends the variants that belong to the other.
pub trait Protocol: Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    type Request: Serialize + DeserializeOwned + Debug + Send + Sync + 'static;
    type Response: Serialize + DeserializeOwned + Debug + Send + Sync + 'static;
    type Notification: Serialize + DeserializeOwned + Debug + Send + Sync + 'static;
}

/// A protocol whose requests include a clock probe.
pub trait PingProtocol: Protocol {
    /// The request that asks the peer for its current timestamp.
    fn ping_request() -> Self::Request;

    /// The peer's timestamp, if `response` is a reply to [`ping_request`](Self::ping_request).
    fn pong_timestamp(response: &Self::Response) -> Option<f64>;
}
