use std::future::Future;
use std::sync::{Arc, Mutex};

use cuesync_core::control::{Control, ControlNotification, ControlPlayState, ControlRequest, ControlResponse};
use tokio::sync::watch;

use super::CONTROLLER_CONNECTION;
use crate::endpoint::{Endpoint, EndpointId, Handler, Outbound};
use crate::error::RequestError;
use crate::options::EndpointOptions;
use crate::pinging::{PingSample, Pinger};

/// The daemon's side of a control connection.
///
/// State that arrives before the first clock sample is held back and
/// translated as soon as the sample exists.
pub struct ServerEndpoint {
    endpoint: Endpoint<Control>,
    handler: ServerHandler,
    pinger: Pinger,
}

struct ServerHandler {
    id: EndpointId,
    shared: Arc<Shared>,
}

struct Shared {
    clock_state: Mutex<ClockState>,
    state: watch::Sender<Option<ControlPlayState>>,
}

#[derive(Default)]
struct ClockState {
    unprocessed: Option<ControlPlayState>,
    sample: Option<PingSample>,
}

impl ServerEndpoint {
    /// Must be called inside a tokio runtime: pinging starts immediately.
    pub fn new(outbound: Outbound, options: &EndpointOptions) -> Self {
        let endpoint = options.endpoint::<Control>(outbound, CONTROLLER_CONNECTION);
        let (state, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            clock_state: Mutex::new(ClockState::default()),
            state,
        });

        let on_sample = {
            let shared = shared.clone();
            move |sample: PingSample| {
                let mut clock_state = crate::lock(&shared.clock_state);
                clock_state.sample = Some(sample);
                if let Some(held) = clock_state.unprocessed.take() {
                    shared.state.send_replace(Some(held.shifted(sample.diff)));
                }
            }
        };
        let pinger = Pinger::spawn(endpoint.clone(), options.ping, options.clock.clone(), on_sample);

        let handler = ServerHandler {
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

    pub fn receive(&self, frame: &str) {
        self.endpoint.receive(&self.handler, frame);
    }

    pub fn closed(&self) {
        self.pinger.stop();
        self.endpoint.closed(&self.handler);
    }

    /// The controller's play state on the local clock.
    pub fn subscribe(&self) -> watch::Receiver<Option<ControlPlayState>> {
        self.handler.shared.state.subscribe()
    }

    pub fn state(&self) -> Option<ControlPlayState> {
        self.handler.shared.state.borrow().clone()
    }

    pub fn latest_ping(&self) -> Option<PingSample> {
        self.pinger.latest()
    }

    /// Send a playback command. Resolves to the controller's success flag.
    pub async fn send_control(&self, request: ControlRequest) -> Result<bool, RequestError> {
        match self.endpoint.request(request).await? {
            ControlResponse::Result { success } => Ok(success),
            other => Err(RequestError::UnexpectedResponse(format!(
                "expected result, got {other:?}"
            ))),
        }
    }
}

impl Handler<Control> for ServerHandler {
    fn handle_request(
        &self,
        request: ControlRequest,
    ) -> impl Future<Output = anyhow::Result<ControlResponse>> + Send + 'static {
        async move { Err::<ControlResponse, _>(anyhow::anyhow!("server does not serve {request:?}")) }
    }

    fn handle_notification(&self, notification: ControlNotification) {
        let ControlNotification::State { data } = notification;
        let mut clock_state = crate::lock(&self.shared.clock_state);
        let sample = clock_state.sample;
        match sample {
            Some(sample) => {
                self.shared.state.send_replace(Some(data.shifted(sample.diff)));
            }
            None => {
                tracing::debug!(endpoint = %self.id, "holding controller state until clock offset is known");
                clock_state.unprocessed = Some(data);
            }
        }
    }

    fn handle_closed(&self) {
        tracing::info!(endpoint = %self.id, "controller disconnected");
        self.shared.state.send_replace(None);
    }
}
