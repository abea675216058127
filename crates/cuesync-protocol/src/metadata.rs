//! Connection-metadata gossip.
//!
//! Every node keeps a table of all nodes it has heard of, keyed by uuid,
//! and floods changes to its endpoints. Flooding is demand-gated: nodes only
//! push while some node (possibly this one) has a local listener that wants
//! the topology. Duplicate and stale information is absorbed, so the flood
//! converges on any graph.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cuesync_core::clock::{system_clock, SharedClock};
use cuesync_core::message::ReservedNotification;
use cuesync_core::metadata::{ConnectionInfo, ConnectionMetadataNode, ConnectionMetadataNotification};
use tokio::sync::mpsc;

use crate::endpoint::{EndpointId, Outbound};

/// Default window in which a node that wants metadata keeps gossip flowing.
pub const DEFAULT_LIVENESS: Duration = Duration::from_secs(10);

/// Handle returned by [`ConnectionMetadataManager::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A local subscriber. Receives the full snapshot on registration and again
/// after every change.
pub struct MetadataListener {
    pub id: ListenerId,
    pub receiver: mpsc::UnboundedReceiver<ConnectionMetadataNotification>,
}

/// Owns this node's view of the topology. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionMetadataManager {
    inner: Arc<Mutex<State>>,
}

struct EndpointEntry {
    connection_type: String,
    last_ping: Option<u64>,
    peer_uuid: Option<String>,
    outbound: Outbound,
}

struct State {
    self_node: ConnectionMetadataNode,
    nodes: BTreeMap<String, ConnectionMetadataNode>,
    endpoints: BTreeMap<EndpointId, EndpointEntry>,
    listeners: BTreeMap<ListenerId, mpsc::UnboundedSender<ConnectionMetadataNotification>>,
    next_listener_id: u64,
    clock: SharedClock,
    liveness: Duration,
}

impl ConnectionMetadataManager {
    /// A manager on the system clock with the default liveness window.
    pub fn new(name: Option<&str>) -> Self {
        Self::with_clock(name, system_clock(), DEFAULT_LIVENESS)
    }

    pub fn with_clock(name: Option<&str>, clock: SharedClock, liveness: Duration) -> Self {
        let self_node = ConnectionMetadataNode {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.map(str::to_string),
            last_update_millis: clock.now_millis() as u64,
            wants_metadata: false,
            distance: 0,
            connections: BTreeMap::new(),
        };
        let mut nodes = BTreeMap::new();
        nodes.insert(self_node.uuid.clone(), self_node.clone());
        tracing::debug!(uuid = %self_node.uuid, "connection metadata manager created");
        Self {
            inner: Arc::new(Mutex::new(State {
                self_node,
                nodes,
                endpoints: BTreeMap::new(),
                listeners: BTreeMap::new(),
                next_listener_id: 1,
                clock,
                liveness,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        crate::lock(&self.inner)
    }

    pub fn self_uuid(&self) -> String {
        self.lock().self_node.uuid.clone()
    }

    /// Everything this node currently knows, in uuid order.
    pub fn snapshot(&self) -> ConnectionMetadataNotification {
        self.lock().snapshot()
    }

    /// Does any live node want topology updates?
    pub fn nodes_want_updates(&self) -> bool {
        self.lock().nodes_want_updates()
    }

    // ── Endpoints ─────────────────────────────────────────────────────────────

    /// Start tracking a connection. Frames for the peer are written to `outbound`.
    pub fn register_endpoint(&self, id: EndpointId, connection_type: &str, outbound: Outbound) {
        let mut state = self.lock();
        tracing::debug!(endpoint = %id, connection_type, "endpoint joined gossip");
        let force = state.nodes_want_updates();
        state.share_changes(force, |state| {
            state.endpoints.insert(
                id,
                EndpointEntry {
                    connection_type: connection_type.to_string(),
                    last_ping: None,
                    peer_uuid: None,
                    outbound,
                },
            );
            state.update_self();
        });
    }

    pub fn remove_endpoint(&self, id: EndpointId) {
        let mut state = self.lock();
        let force = state.nodes_want_updates();
        state.share_changes(force, |state| {
            if state.endpoints.remove(&id).is_some() {
                tracing::debug!(endpoint = %id, "endpoint left gossip");
                state.update_self();
            }
        });
    }

    /// Record a round trip to the peer of `id`. Stored rounded up to whole
    /// milliseconds; an unchanged value causes no gossip.
    pub fn update_endpoint_ping(&self, id: EndpointId, ping_millis: f64) {
        let rounded = ping_millis.max(0.0).ceil() as u64;
        let mut state = self.lock();
        let force = state.nodes_want_updates();
        state.share_changes(force, |state| {
            let changed = match state.endpoints.get_mut(&id) {
                Some(entry) if entry.last_ping != Some(rounded) => {
                    entry.last_ping = Some(rounded);
                    true
                }
                _ => false,
            };
            if changed {
                state.update_self();
            }
        });
    }

    /// Merge a gossip payload that arrived on endpoint `from`.
    pub fn accept_notification(&self, from: EndpointId, notification: ConnectionMetadataNotification) {
        let mut state = self.lock();
        let force = state.nodes_want_updates();
        state.share_changes(force, |state| {
            let learned_peer = match state.endpoints.get_mut(&from) {
                Some(entry) if entry.peer_uuid.as_deref() != Some(notification.own_uuid.as_str()) => {
                    entry.peer_uuid = Some(notification.own_uuid.clone());
                    true
                }
                _ => false,
            };
            if learned_peer {
                tracing::debug!(endpoint = %from, peer = %notification.own_uuid, "learned peer uuid");
                state.update_self();
            }
            for node in notification.nodes {
                // Only this node speaks for itself.
                if node.uuid == state.self_node.uuid {
                    continue;
                }
                let distance = node.distance.saturating_add(1);
                state.handle_node_info(ConnectionMetadataNode { distance, ..node });
            }
        });
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    /// Subscribe to topology snapshots. The first listener makes this node
    /// want updates, which starts gossip across the network.
    pub fn add_listener(&self) -> MetadataListener {
        let mut state = self.lock();
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        let (tx, receiver) = mpsc::unbounded_channel();
        let _ = tx.send(state.snapshot());
        state.share_changes(true, |state| {
            state.listeners.insert(id, tx);
            state.update_self();
        });
        MetadataListener { id, receiver }
    }

    /// Removing the last listener retracts this node's interest.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut state = self.lock();
        state.share_changes(true, |state| {
            if state.listeners.remove(&id).is_some() {
                state.update_self();
            }
        });
    }
}

impl State {
    fn snapshot(&self) -> ConnectionMetadataNotification {
        ConnectionMetadataNotification {
            own_uuid: self.self_node.uuid.clone(),
            nodes: self.nodes.values().cloned().collect(),
        }
    }

    fn nodes_want_updates(&self) -> bool {
        let threshold = self.clock.now_millis() - self.liveness.as_secs_f64() * 1000.0;
        self.nodes
            .values()
            .any(|node| node.wants_metadata && node.last_update_millis as f64 > threshold)
    }

    /// Run `f`, then share the result if it changed anything. Local
    /// listeners always hear about changes; endpoints only when `force` is
    /// set or some live node wants updates.
    fn share_changes(&mut self, force: bool, f: impl FnOnce(&mut State)) {
        let before = self.snapshot();
        f(self);
        self.prune_listeners();
        let after = self.snapshot();
        if before == after {
            return;
        }
        self.send_to_listeners(&after);
        if force || self.nodes_want_updates() {
            self.send_to_endpoints(after);
        }
    }

    /// Forget listeners whose receiver was dropped without `remove_listener`.
    fn prune_listeners(&mut self) {
        let count = self.listeners.len();
        self.listeners.retain(|id, listener| {
            let alive = !listener.is_closed();
            if !alive {
                tracing::trace!(listener = ?id, "metadata listener gone");
            }
            alive
        });
        if self.listeners.len() != count {
            self.update_self();
        }
    }

    fn send_to_listeners(&self, snapshot: &ConnectionMetadataNotification) {
        for (id, listener) in &self.listeners {
            if listener.send(snapshot.clone()).is_err() {
                tracing::trace!(listener = ?id, "metadata listener gone");
            }
        }
    }

    fn send_to_endpoints(&self, snapshot: ConnectionMetadataNotification) {
        let frame = match ReservedNotification::ConnectionMetadata(snapshot).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode connection metadata");
                return;
            }
        };
        for (id, entry) in &self.endpoints {
            if entry.outbound.send(frame.clone()).is_err() {
                tracing::trace!(endpoint = %id, "connection metadata not delivered, transport closed");
            }
        }
        tracing::trace!(endpoints = self.endpoints.len(), "pushed connection metadata");
    }

    /// Rebuild the self node from local state and merge it.
    fn update_self(&mut self) {
        let mut connections: BTreeMap<String, Vec<ConnectionInfo>> = BTreeMap::new();
        for entry in self.endpoints.values() {
            connections
                .entry(entry.connection_type.clone())
                .or_default()
                .push(ConnectionInfo {
                    uuid: entry.peer_uuid.clone(),
                    last_ping: entry.last_ping,
                });
        }
        self.self_node.connections = connections;
        self.self_node.wants_metadata = !self.listeners.is_empty();
        self.self_node.last_update_millis = self.clock.now_millis() as u64;
        let node = self.self_node.clone();
        self.handle_node_info(node);
    }

    /// Merge one node record. Returns whether the table changed.
    ///
    /// Older records are ignored. A record identical apart from distance
    /// only lowers the stored distance. Anything else replaces the stored
    /// record, keeping the smaller of the two distances.
    fn handle_node_info(&mut self, node: ConnectionMetadataNode) -> bool {
        let Some(existing) = self.nodes.get_mut(&node.uuid) else {
            self.nodes.insert(node.uuid.clone(), node);
            return true;
        };
        if node.last_update_millis < existing.last_update_millis {
            return false;
        }
        if existing.same_info(&node) {
            if node.distance < existing.distance {
                existing.distance = node.distance;
                return true;
            }
            return false;
        }
        let distance = existing.distance.min(node.distance);
        *existing = ConnectionMetadataNode { distance, ..node };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuesync_core::clock::ManualClock;
    use cuesync_core::message::{Message, RawMessage};

    fn manager(clock: &Arc<ManualClock>) -> ConnectionMetadataManager {
        ConnectionMetadataManager::with_clock(Some("test"), clock.clone(), DEFAULT_LIVENESS)
    }

    fn remote(uuid: &str, last_update_millis: u64, distance: u32) -> ConnectionMetadataNode {
        ConnectionMetadataNode {
            uuid: uuid.to_string(),
            name: None,
            last_update_millis,
            wants_metadata: false,
            distance,
            connections: BTreeMap::new(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<ConnectionMetadataNotification> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let Message::Notification { notification } = RawMessage::from_frame(&frame).unwrap() else {
                panic!("expected notification frame");
            };
            let ReservedNotification::ConnectionMetadata(n) = serde_json::from_value(notification).unwrap();
            out.push(n);
        }
        out
    }

    #[test]
    fn self_node_is_known_at_distance_zero() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let snapshot = m.snapshot();
        assert_eq!(snapshot.own_uuid, m.self_uuid());
        let me = snapshot.node(&m.self_uuid()).unwrap();
        assert_eq!(me.distance, 0);
        assert_eq!(me.name.as_deref(), Some("test"));
        assert!(!me.wants_metadata);
    }

    #[test]
    fn handle_node_info_is_idempotent() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let mut state = m.lock();
        assert!(state.handle_node_info(remote("n", 500, 2)));
        assert!(!state.handle_node_info(remote("n", 500, 2)));
        assert!(!state.handle_node_info(remote("n", 400, 1)), "older record must be ignored");
        assert_eq!(state.nodes["n"].distance, 2);
    }

    #[test]
    fn distance_converges_to_shortest_path() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let mut state = m.lock();
        state.handle_node_info(remote("n", 500, 3));
        assert!(state.handle_node_info(remote("n", 500, 1)));
        assert_eq!(state.nodes["n"].distance, 1);
        assert!(!state.handle_node_info(remote("n", 500, 2)));
        assert_eq!(state.nodes["n"].distance, 1);
    }

    #[test]
    fn newer_record_keeps_smaller_distance() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let mut state = m.lock();
        state.handle_node_info(remote("n", 500, 1));
        let mut newer = remote("n", 600, 4);
        newer.wants_metadata = true;
        assert!(state.handle_node_info(newer));
        assert_eq!(state.nodes["n"].distance, 1);
        assert!(state.nodes["n"].wants_metadata);
    }

    #[test]
    fn no_gossip_without_demand() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = EndpointId::next();
        m.register_endpoint(id, "downstream", tx);
        assert!(drain(&mut rx).is_empty(), "nobody listens, nothing to announce");

        m.update_endpoint_ping(id, 12.2);
        m.accept_notification(id, ConnectionMetadataNotification {
            own_uuid: "peer".into(),
            nodes: vec![remote("peer", 900, 0)],
        });
        assert!(drain(&mut rx).is_empty());

        let me = m.snapshot().node(&m.self_uuid()).cloned().unwrap();
        let info = &me.connections["downstream"][0];
        assert_eq!(info.last_ping, Some(13));
        assert_eq!(info.uuid.as_deref(), Some("peer"));
        assert_eq!(m.snapshot().node("peer").unwrap().distance, 1);
    }

    #[test]
    fn listener_turns_gossip_on_and_off() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = EndpointId::next();
        m.register_endpoint(id, "downstream", tx);
        drain(&mut rx);

        let mut listener = m.add_listener();
        let initial = listener.receiver.try_recv().unwrap();
        assert!(!initial.node(&m.self_uuid()).unwrap().wants_metadata);
        let after = listener.receiver.try_recv().unwrap();
        assert!(after.node(&m.self_uuid()).unwrap().wants_metadata);

        let pushed = drain(&mut rx);
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].node(&m.self_uuid()).unwrap().wants_metadata);
        assert!(m.nodes_want_updates());

        // Changes now flow to endpoints as well.
        clock.advance(10.0);
        m.update_endpoint_ping(id, 5.0);
        assert_eq!(drain(&mut rx).len(), 1);

        m.remove_listener(listener.id);
        let retraction = drain(&mut rx);
        assert_eq!(retraction.len(), 1);
        assert!(!retraction[0].node(&m.self_uuid()).unwrap().wants_metadata);
        assert!(!m.nodes_want_updates());
    }

    #[test]
    fn remote_demand_expires_after_liveness_window() {
        let clock = ManualClock::new(100_000.0);
        let m = manager(&clock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = EndpointId::next();
        m.register_endpoint(id, "upstream", tx);
        drain(&mut rx);

        let mut wanting = remote("peer", 99_000, 0);
        wanting.wants_metadata = true;
        m.accept_notification(id, ConnectionMetadataNotification {
            own_uuid: "peer".into(),
            nodes: vec![wanting],
        });
        assert!(m.nodes_want_updates());
        assert_eq!(drain(&mut rx).len(), 1);

        clock.advance(DEFAULT_LIVENESS.as_millis() as f64);
        assert!(!m.nodes_want_updates());
        m.update_endpoint_ping(id, 3.0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn removed_endpoint_disappears_from_self_node() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = EndpointId::next();
        m.register_endpoint(id, "controller", tx);
        assert!(m.snapshot().node(&m.self_uuid()).unwrap().connections.contains_key("controller"));
        clock.advance(1.0);
        m.remove_endpoint(id);
        assert!(m.snapshot().node(&m.self_uuid()).unwrap().connections.is_empty());
    }

    #[test]
    fn repeated_notification_is_pushed_once() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = EndpointId::next();
        m.register_endpoint(id, "upstream", tx);
        let _listener = m.add_listener();
        drain(&mut rx);

        let notification = ConnectionMetadataNotification {
            own_uuid: "peer".into(),
            nodes: vec![remote("peer", 900, 0)],
        };
        m.accept_notification(id, notification.clone());
        assert_eq!(drain(&mut rx).len(), 1);
        m.accept_notification(id, notification);
        assert!(drain(&mut rx).is_empty(), "duplicate must not be re-flooded");

        m.accept_notification(id, ConnectionMetadataNotification {
            own_uuid: "peer".into(),
            nodes: vec![remote("peer", 900, 2)],
        });
        assert!(drain(&mut rx).is_empty());
        assert_eq!(m.snapshot().node("peer").unwrap().distance, 1);
    }

    #[test]
    fn endpoint_removal_without_demand_is_not_pushed() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = EndpointId::next();
        let b = EndpointId::next();
        m.register_endpoint(a, "downstream", tx_a);
        m.register_endpoint(b, "downstream", tx_b);
        drain(&mut rx_b);

        clock.advance(1.0);
        m.remove_endpoint(a);
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(m.snapshot().node(&m.self_uuid()).unwrap().connections["downstream"].len(), 1);
    }

    #[test]
    fn dropped_listener_retracts_interest() {
        let clock = ManualClock::new(1_000.0);
        let m = manager(&clock);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = EndpointId::next();
        m.register_endpoint(id, "downstream", tx);
        let listener = m.add_listener();
        drain(&mut rx);
        assert!(m.nodes_want_updates());

        drop(listener);
        clock.advance(10.0);
        m.update_endpoint_ping(id, 5.0);

        let pushed = drain(&mut rx);
        assert_eq!(pushed.len(), 1);
        assert!(!pushed[0].node(&m.self_uuid()).unwrap().wants_metadata);
        assert!(!m.snapshot().node(&m.self_uuid()).unwrap().wants_metadata);
        assert!(!m.nodes_want_updates());
    }
}
