use std::future::Future;
use std::sync::{Arc, Mutex};

use cuesync_core::broadcast::{
    Broadcast, BroadcastNotification, BroadcastRequest, BroadcastResponse, PlayStateData,
};
use cuesync_core::clock::SharedClock;

use super::DOWNSTREAM_CONNECTION;
use crate::endpoint::{Endpoint, EndpointId, Handler, Outbound};
use crate::options::EndpointOptions;
use crate::store::FileResolver;

/// Clock sample most recently reported by the downstream peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownstreamPing {
    pub ping: f64,
    pub diff: f64,
}

/// The data-holding side of a broadcast connection.
pub struct UpstreamEndpoint<R: FileResolver> {
    endpoint: Endpoint<Broadcast>,
    handler: UpstreamHandler<R>,
}

struct UpstreamHandler<R> {
    id: EndpointId,
    files: Arc<R>,
    clock: SharedClock,
    downstream_ping: Mutex<Option<DownstreamPing>>,
}

impl<R: FileResolver> UpstreamEndpoint<R> {
    pub fn new(outbound: Outbound, files: Arc<R>, options: &EndpointOptions) -> Self {
        let endpoint = options.endpoint::<Broadcast>(outbound, DOWNSTREAM_CONNECTION);
        let handler = UpstreamHandler {
            id: endpoint.id(),
            files,
            clock: options.clock.clone(),
            downstream_ping: Mutex::new(None),
        };
        Self { endpoint, handler }
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

    pub fn closed(&self) {
        self.endpoint.closed(&self.handler);
    }

    /// Push play state, on this node's clock.
    pub fn send_state(&self, state: &PlayStateData) {
        self.endpoint
            .send_notification(BroadcastNotification::PlayingState { data: state.clone() });
    }

    pub fn downstream_ping(&self) -> Option<DownstreamPing> {
        *crate::lock(&self.handler.downstream_ping)
    }
}

impl<R: FileResolver> Handler<Broadcast> for UpstreamHandler<R> {
    fn handle_request(
        &self,
        request: BroadcastRequest,
    ) -> impl Future<Output = anyhow::Result<BroadcastResponse>> + Send + 'static {
        // Stamp the pong as the request is taken off the wire.
        let now = self.clock.now_millis();
        let files = self.files.clone();
        async move {
            match request {
                BroadcastRequest::Ping => Ok(BroadcastResponse::Pong { timestamp_millis: now }),
                BroadcastRequest::File { file_hash } => {
                    let file = files.get_file(&file_hash).await?;
                    Ok(BroadcastResponse::File { file })
                }
            }
        }
    }

    fn handle_notification(&self, notification: BroadcastNotification) {
        match notification {
            BroadcastNotification::Ping { ping, diff } => {
                tracing::debug!(endpoint = %self.id, ping_ms = ping, diff_ms = diff, "downstream reported clock sample");
                *crate::lock(&self.downstream_ping) = Some(DownstreamPing { ping, diff });
            }
            BroadcastNotification::PlayingState { .. } => {
                tracing::warn!(endpoint = %self.id, "downstream sent play state, ignoring");
            }
        }
    }

    fn handle_closed(&self) {
        tracing::info!(endpoint = %self.id, "downstream disconnected");
    }
}
