use std::future::Future;
use std::sync::{Arc, Mutex};

use cuesync_core::broadcast::{
    Broadcast, BroadcastNotification, BroadcastRequest, BroadcastResponse, PlayStateData,
};
use cuesync_core::file::CueFile;
use tokio::sync::watch;

use super::UPSTREAM_CONNECTION;
use crate::endpoint::{Endpoint, EndpointId, Handler, Outbound};
use crate::error::RequestError;
use crate::options::EndpointOptions;
use crate::pinging::{PingSample, Pinger};

/// The consuming side of a broadcast connection.
///
/// Play state is only surfaced once a clock sample exists, and is
/// re-translated whenever a better sample is accepted.
pub struct DownstreamEndpoint {
    endpoint: Endpoint<Broadcast>,
    handler: DownstreamHandler,
    pinger: Pinger,
}

struct DownstreamHandler {
    id: EndpointId,
    shared: Arc<Shared>,
}

struct Shared {
    clock_state: Mutex<ClockState>,
    /// Last state on the local clock.
    state: watch::Sender<Option<PlayStateData>>,
}

#[derive(Default)]
struct ClockState {
    /// Last state as received, on the upstream's clock.
    raw: Option<PlayStateData>,
    sample: Option<PingSample>,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut ClockState)) {
        let mut clock_state = crate::lock(&self.clock_state);
        f(&mut clock_state);
        if let (Some(raw), Some(sample)) = (&clock_state.raw, clock_state.sample) {
            self.state.send_replace(Some(raw.shifted(sample.diff)));
        }
    }
}

impl DownstreamEndpoint {
    /// Must be called inside a tokio runtime: pinging starts immediately.
    pub fn new(outbound: Outbound, options: &EndpointOptions) -> Self {
        let endpoint = options.endpoint::<Broadcast>(outbound, UPSTREAM_CONNECTION);
        let (state, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            clock_state: Mutex::new(ClockState::default()),
            state,
        });

        let notifier = endpoint.clone();
        let on_sample = {
            let shared = shared.clone();
            move |sample: PingSample| {
                notifier.send_notification(BroadcastNotification::Ping {
                    ping: sample.ping,
                    diff: sample.diff,
                });
                shared.update(|clock_state| clock_state.sample = Some(sample));
            }
        };
        let pinger = Pinger::spawn(endpoint.clone(), options.ping, options.clock.clone(), on_sample);

        let handler = DownstreamHandler {
            id: endpoint.id(),
            shared,
        };
        Self {
            endpoint,
            handler,
            pinger,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.endpoint.id()
    }

    pub fn endpoint(&self) -> &Endpoint<Broadcast> {
        &self.endpoint
    }

    pub fn receive(&self, frame: &str) {
        self.endpoint.receive(&self.handler, frame);
    }

    /// Stops pinging and leaves the gossip layer. Outstanding file
    /// requests keep waiting; see [`Endpoint::reject_all_pending`].
    pub fn closed(&self) {
        self.pinger.stop();
        self.endpoint.closed(&self.handler);
    }

    /// Play state on the local clock. `None` until both a state and a
    /// clock sample have arrived.
    pub fn subscribe(&self) -> watch::Receiver<Option<PlayStateData>> {
        self.handler.shared.state.subscribe()
    }

    pub fn state(&self) -> Option<PlayStateData> {
        self.handler.shared.state.borrow().clone()
    }

    pub fn latest_ping(&self) -> Option<PingSample> {
        self.pinger.latest()
    }

    /// Fetch a cue file by content hash.
    pub async fn get_file(&self, hash: &str) -> Result<CueFile, RequestError> {
        let request = BroadcastRequest::File {
            file_hash: hash.to_string(),
        };
        match self.endpoint.request(request).await? {
            BroadcastResponse::File { file } => Ok(file),
            other => Err(RequestError::UnexpectedResponse(format!(
                "expected file, got {other:?}"
            ))),
        }
    }
}

impl Handler<Broadcast> for DownstreamHandler {
    fn handle_request(
        &self,
        request: BroadcastRequest,
    ) -> impl Future<Output = anyhow::Result<BroadcastResponse>> + Send + 'static {
        async move { Err::<BroadcastResponse, _>(anyhow::anyhow!("downstream does not serve {request:?}")) }
    }

    fn handle_notification(&self, notification: BroadcastNotification) {
        match notification {
            BroadcastNotification::PlayingState { data } => {
                tracing::trace!(endpoint = %self.id, layers = data.layers.len(), "play state received");
                self.shared.update(|clock_state| clock_state.raw = Some(data));
            }
            BroadcastNotification::Ping { .. } => {
                tracing::warn!(endpoint = %self.id, "upstream sent a ping report, ignoring");
            }
        }
    }

    fn handle_closed(&self) {
        tracing::info!(endpoint = %self.id, "upstream disconnected");
    }
}
