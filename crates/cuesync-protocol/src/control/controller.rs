use std::future::Future;
use std::sync::{Arc, RwLock};

use cuesync_core::clock::SharedClock;
use cuesync_core::control::{Control, ControlNotification, ControlPlayState, ControlRequest, ControlResponse};
use futures::future::BoxFuture;

use super::SERVER_CONNECTION;
use crate::endpoint::{Endpoint, EndpointId, Handler, Outbound};
use crate::options::EndpointOptions;

/// Carries out playback commands on the media source.
pub trait ControlHandler: Send + Sync + 'static {
    /// Returns whether the command took effect.
    fn handle_control(&self, request: ControlRequest) -> BoxFuture<'static, anyhow::Result<bool>>;
}

/// The media source's side of a control connection.
pub struct ControllerEndpoint {
    endpoint: Endpoint<Control>,
    handler: ControllerHandler,
}

struct ControllerHandler {
    id: EndpointId,
    clock: SharedClock,
    control: RwLock<Option<Arc<dyn ControlHandler>>>,
}

impl ControllerEndpoint {
    pub fn new(outbound: Outbound, options: &EndpointOptions) -> Self {
        let endpoint = options.endpoint::<Control>(outbound, SERVER_CONNECTION);
        let handler = ControllerHandler {
            id: endpoint.id(),
            clock: options.clock.clone(),
            control: RwLock::new(None),
        };
        Self { endpoint, handler }
    }

    pub fn id(&self) -> EndpointId {
        self.endpoint.id()
    }

    pub fn receive(&self, frame: &str) {
        self.endpoint.receive(&self.handler, frame);
    }

    pub fn closed(&self) {
        self.endpoint.closed(&self.handler);
    }

    /// Until a handler is set, every command is rejected.
    pub fn set_control_handler(&self, control: Arc<dyn ControlHandler>) {
        *self.handler.control.write().unwrap_or_else(|e| e.into_inner()) = Some(control);
    }

    /// Report what is playing, on this side's clock.
    pub fn send_state(&self, state: &ControlPlayState) {
        self.endpoint
            .send_notification(ControlNotification::State { data: state.clone() });
    }
}

impl Handler<Control> for ControllerHandler {
    fn handle_request(
        &self,
        request: ControlRequest,
    ) -> impl Future<Output = anyhow::Result<ControlResponse>> + Send + 'static {
        let now = self.clock.now_millis();
        let control = self
            .control
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        async move {
            if request == ControlRequest::Ping {
                return Ok(ControlResponse::Pong { timestamp_millis: now });
            }
            let Some(control) = control else {
                anyhow::bail!("no control handler set");
            };
            let success = control.handle_control(request).await?;
            Ok(ControlResponse::Result { success })
        }
    }

    fn handle_notification(&self, notification: ControlNotification) {
        tracing::warn!(endpoint = %self.id, ?notification, "server sent a notification, ignoring");
    }
}
