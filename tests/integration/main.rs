//! cuesync integration test harness.
//!
//! Every test wires real endpoints together in-process: each side's
//! outbound channel is pumped into the other side's `receive`, exactly as
//! the WebSocket transports do. No sockets, no daemon.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cuesync_protocol::broadcast::{DownstreamEndpoint, UpstreamEndpoint};
use cuesync_protocol::{EndpointOptions, FileResolver};

mod broadcast;
mod control;
mod gossip;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_secs(5);

/// Feed every frame from `rx` to `deliver` until the sending side is gone.
pub fn pipe<F>(mut rx: mpsc::UnboundedReceiver<String>, deliver: F) -> JoinHandle<()>
where
    F: Fn(&str) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            deliver(&frame);
        }
    })
}

/// Poll `check` until it returns true, panicking after [`WAIT`].
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `fut`, panicking after [`WAIT`].
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    match tokio::time::timeout(WAIT, fut).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

/// A connected broadcast link.
pub struct BroadcastLink<R: FileResolver> {
    pub upstream: Arc<UpstreamEndpoint<R>>,
    pub downstream: Arc<DownstreamEndpoint>,
}

pub fn broadcast_link<R: FileResolver>(
    files: Arc<R>,
    upstream_options: &EndpointOptions,
    downstream_options: &EndpointOptions,
) -> BroadcastLink<R> {
    let (up_tx, up_rx) = mpsc::unbounded_channel();
    let (down_tx, down_rx) = mpsc::unbounded_channel();
    let upstream = Arc::new(UpstreamEndpoint::new(up_tx, files, upstream_options));
    let downstream = Arc::new(DownstreamEndpoint::new(down_tx, downstream_options));

    pipe(up_rx, {
        let downstream = downstream.clone();
        move |frame| downstream.receive(frame)
    });
    pipe(down_rx, {
        let upstream = upstream.clone();
        move |frame| upstream.receive(frame)
    });

    BroadcastLink { upstream, downstream }
}
