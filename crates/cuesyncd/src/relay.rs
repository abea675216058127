//! Relay mode: follow a parent upstream and re-broadcast its state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use cuesync_protocol::broadcast::DownstreamEndpoint;
use cuesync_protocol::{client, EndpointOptions, Outbound};

use crate::files::ParentLink;
use crate::hub::Hub;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Stay connected to `url` until shutdown, reconnecting with backoff.
pub async fn relay_loop(
    url: String,
    hub: Hub,
    parent: ParentLink,
    options: EndpointOptions,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut delay = INITIAL_RECONNECT_DELAY;
    loop {
        match client::connect(&url).await {
            Ok((outbound, incoming)) => {
                delay = INITIAL_RECONNECT_DELAY;
                let stop = session(outbound, incoming, &hub, &parent, &options, &mut shutdown).await;
                if stop {
                    break;
                }
                tracing::info!(%url, "lost parent upstream");
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, retry_secs = delay.as_secs(), "failed to reach parent upstream");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => break,
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
    tracing::info!("relay stopped");
}

/// Returns true if the session ended because of shutdown.
async fn session(
    outbound: Outbound,
    mut incoming: mpsc::UnboundedReceiver<String>,
    hub: &Hub,
    parent: &ParentLink,
    options: &EndpointOptions,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    let downstream = Arc::new(DownstreamEndpoint::new(outbound, options));
    parent.set(Some(downstream.clone()));
    let mut states = downstream.subscribe();

    let stop = loop {
        tokio::select! {
            frame = incoming.recv() => match frame {
                Some(frame) => downstream.receive(&frame),
                None => break false,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break false;
                }
                let state = states.borrow_and_update().clone();
                if let Some(state) = state {
                    hub.publish(state);
                }
            }
            _ = shutdown.recv() => break true,
        }
    };

    parent.set(None);
    downstream.closed();
    // File fetches forwarded to the parent would otherwise wait forever.
    downstream.endpoint().reject_all_pending();
    stop
}
