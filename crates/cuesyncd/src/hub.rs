//! Play-state hub: fans the current state out to every downstream.
//!
//! State comes either from local controllers (mapped onto cue files in the
//! store) or, in relay mode, from the parent upstream.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use cuesync_core::broadcast::{LayerState, PlayStateData};
use cuesync_core::control::{ControlLayerState, ControlPlayState, ControlRequest, MediaFile};
use cuesync_protocol::broadcast::UpstreamEndpoint;
use cuesync_protocol::control::ServerEndpoint;
use cuesync_protocol::{CueStore, EndpointId};

use crate::files::DaemonFiles;

pub type Downstream = Arc<UpstreamEndpoint<DaemonFiles>>;

struct ControllerSlot {
    endpoint: Arc<ServerEndpoint>,
    state: Option<ControlPlayState>,
    /// Hub-wide sequence number of the last state change.
    updated: u64,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    store: CueStore,
    downstreams: DashMap<EndpointId, Downstream>,
    controllers: DashMap<EndpointId, ControllerSlot>,
    state: Mutex<PlayStateData>,
    sequence: AtomicU64,
}

impl Hub {
    pub fn new(store: CueStore) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                downstreams: DashMap::new(),
                controllers: DashMap::new(),
                state: Mutex::new(PlayStateData::default()),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    // ── Downstreams ───────────────────────────────────────────────────────────

    /// Track a new downstream and bring it up to date. Holding the state
    /// lock keeps a concurrent publish from landing between the two steps.
    pub fn add_downstream(&self, downstream: Downstream) {
        let current = self.lock_state();
        downstream.send_state(&current);
        self.inner.downstreams.insert(downstream.id(), downstream);
    }

    pub fn remove_downstream(&self, id: EndpointId) {
        self.inner.downstreams.remove(&id);
    }

    pub fn downstreams(&self) -> Vec<Downstream> {
        self.inner.downstreams.iter().map(|e| e.value().clone()).collect()
    }

    // ── Controllers ───────────────────────────────────────────────────────────

    pub fn add_controller(&self, endpoint: Arc<ServerEndpoint>) {
        let updated = self.next_sequence();
        self.inner.controllers.insert(
            endpoint.id(),
            ControllerSlot {
                endpoint,
                state: None,
                updated,
            },
        );
    }

    /// Record a controller's translated state and republish.
    pub fn controller_state(&self, id: EndpointId, state: Option<ControlPlayState>) {
        let updated = self.next_sequence();
        if let Some(mut slot) = self.inner.controllers.get_mut(&id) {
            slot.state = state;
            slot.updated = updated;
        }
        self.recompute();
    }

    pub fn remove_controller(&self, id: EndpointId) {
        if self.inner.controllers.remove(&id).is_some() {
            self.recompute();
        }
    }

    pub fn controller_count(&self) -> usize {
        self.inner.controllers.len()
    }

    /// Forward a playback command to the most recently active controller.
    pub async fn send_control(&self, request: ControlRequest) -> anyhow::Result<bool> {
        let endpoint = self
            .inner
            .controllers
            .iter()
            .max_by_key(|slot| slot.updated)
            .map(|slot| slot.endpoint.clone())
            .ok_or_else(|| anyhow::anyhow!("no controller connected"))?;
        Ok(endpoint.send_control(request).await?)
    }

    fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// The most recently updated controller with a state wins.
    fn recompute(&self) {
        let active = self
            .inner
            .controllers
            .iter()
            .filter_map(|slot| slot.state.clone().map(|state| (slot.updated, state)))
            .max_by_key(|(updated, _)| *updated)
            .map(|(_, state)| state);
        let state = match active {
            Some(control) => broadcast_state(&self.inner.store, &control),
            None => PlayStateData::default(),
        };
        self.publish(state);
    }

    // ── State ─────────────────────────────────────────────────────────────────

    /// Replace the current state and push it to every downstream if it changed.
    pub fn publish(&self, state: PlayStateData) {
        let mut current = self.lock_state();
        if *current == state {
            return;
        }
        tracing::info!(
            layers = state.layers.len(),
            downstreams = self.inner.downstreams.len(),
            "publishing play state"
        );
        // Fan out under the lock so downstreams see states in publish order.
        for downstream in self.inner.downstreams.iter() {
            downstream.send_state(&state);
        }
        *current = state;
    }

    pub fn current_state(&self) -> PlayStateData {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, PlayStateData> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Map a controller's state onto broadcast layers. Only playing layers whose
/// media resolves to a stored cue file are kept; media is matched by path
/// stem or by title.
pub fn broadcast_state(store: &CueStore, control: &ControlPlayState) -> PlayStateData {
    let layers = control
        .layers
        .iter()
        .filter_map(|layer| {
            let ControlLayerState::Playing {
                effective_start_time_millis,
                play_speed,
            } = layer.state
            else {
                return None;
            };
            let name = match &layer.file {
                MediaFile::Path { path } => Path::new(path).file_stem()?.to_str()?.to_string(),
                MediaFile::Meta { title, .. } => title.clone(),
            };
            let Some(file_hash) = store.hash_for_name(&name) else {
                tracing::debug!(%name, "no cue file for media");
                return None;
            };
            Some(LayerState {
                file_hash,
                effective_start_time_millis,
                amplitude: 1.0,
                play_speed,
            })
        })
        .collect();
    PlayStateData { layers }
}
