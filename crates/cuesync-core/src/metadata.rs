//! Connection-topology metadata exchanged by the gossip layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One entry in a node's connection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Uuid of the node on the other end, once it has introduced itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Last measured round trip to that node, in whole milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ping: Option<u64>,
}

/// What a node knows about itself, as seen by whoever holds this copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadataNode {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Wall-clock time of the node's last change, on the node's own clock.
    pub last_update_millis: u64,
    /// True while the node has local listeners that want topology updates.
    pub wants_metadata: bool,
    /// Gossip hops between the node and the holder of this copy. 0 for self.
    pub distance: u32,
    /// Connections grouped by connection type.
    pub connections: BTreeMap<String, Vec<ConnectionInfo>>,
}

impl ConnectionMetadataNode {
    /// Equal in every attribute except `distance`.
    pub fn same_info(&self, other: &Self) -> bool {
        self.uuid == other.uuid
            && self.name == other.name
            && self.last_update_millis == other.last_update_millis
            && self.wants_metadata == other.wants_metadata
            && self.connections == other.connections
    }
}

/// Payload of the reserved `connection-metadata` notification, and the
/// snapshot handed to local listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadataNotification {
    pub own_uuid: String,
    pub nodes: Vec<ConnectionMetadataNode>,
}

impl ConnectionMetadataNotification {
    pub fn node(&self, uuid: &str) -> Option<&ConnectionMetadataNode> {
        self.nodes.iter().find(|n| n.uuid == uuid)
    }
}
