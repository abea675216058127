//! Clock-offset estimation by periodic ping.
//!
//! A probe records the local send time `t0`, asks the peer for its clock,
//! and records the local receive time `t1`. Assuming a symmetric path, the
//! peer's timestamp corresponds to the local midpoint `t0 + (t1 - t0) / 2`,
//! so `diff = midpoint - peer` converts peer times to local ones.
//!
//! Only a sample with a strictly lower round trip than the best so far
//! replaces it: the shortest round trip bounds the asymmetry error best.

use std::time::Duration;

use cuesync_core::clock::{Clock, SharedClock};
use cuesync_core::config::ProtocolConfig;
use cuesync_core::message::PingProtocol;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::endpoint::Endpoint;
use crate::error::RequestError;

/// One accepted clock sample. All values in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingSample {
    /// Round-trip time.
    pub ping: f64,
    /// Local time the probe was sent.
    pub request_time: f64,
    /// Local clock minus peer clock.
    pub diff: f64,
}

impl PingSample {
    /// Translate a timestamp on the peer's clock to the local clock.
    pub fn to_local(&self, peer_millis: f64) -> f64 {
        peer_millis + self.diff
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSettings {
    /// Wait after a successful probe.
    pub interval: Duration,
    /// Wait after the first failed probe. Doubles per consecutive failure.
    pub initial_backoff: Duration,
    /// A probe without an answer in this time has failed.
    pub timeout: Duration,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for PingSettings {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            interval: config.ping_interval(),
            initial_backoff: config.ping_initial_backoff(),
            timeout: config.ping_timeout(),
        }
    }
}

// ── Pure state ────────────────────────────────────────────────────────────────

/// The best sample seen so far.
#[derive(Debug, Clone, Default)]
pub struct PingState {
    best: Option<PingSample>,
}

impl PingState {
    pub fn best(&self) -> Option<PingSample> {
        self.best
    }

    /// Offer a completed probe. Returns the new sample if it was accepted.
    pub fn offer(&mut self, request_time: f64, response_time: f64, peer_millis: f64) -> Option<PingSample> {
        let ping = response_time - request_time;
        if matches!(self.best, Some(best) if ping >= best.ping) {
            return None;
        }
        let sample = PingSample {
            ping,
            request_time,
            diff: request_time + ping / 2.0 - peer_millis,
        };
        self.best = Some(sample);
        Some(sample)
    }
}

/// Retry delay after failed probes: doubles every time, reset by a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self { initial, next: initial }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

// ── Pinger ────────────────────────────────────────────────────────────────────

/// Background probe loop for one endpoint. The first probe goes out
/// immediately; the loop stops on [`stop`](Self::stop) or drop.
pub struct Pinger {
    samples: watch::Receiver<Option<PingSample>>,
    task: JoinHandle<()>,
}

impl Pinger {
    /// Start probing over `endpoint`. `on_sample` runs for every accepted
    /// sample, after the sample is visible through [`latest`](Self::latest).
    pub fn spawn<P, F>(endpoint: Endpoint<P>, settings: PingSettings, clock: SharedClock, on_sample: F) -> Self
    where
        P: PingProtocol,
        F: Fn(PingSample) + Send + Sync + 'static,
    {
        let (tx, samples) = watch::channel(None);
        let task = tokio::spawn(run(endpoint, settings, clock, tx, on_sample));
        Self { samples, task }
    }

    pub fn latest(&self) -> Option<PingSample> {
        *self.samples.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PingSample>> {
        self.samples.clone()
    }

    /// Cancel the probe loop, including any pending retry.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<P, F>(
    endpoint: Endpoint<P>,
    settings: PingSettings,
    clock: SharedClock,
    samples: watch::Sender<Option<PingSample>>,
    on_sample: F,
) where
    P: PingProtocol,
    F: Fn(PingSample) + Send + Sync + 'static,
{
    let mut state = PingState::default();
    let mut backoff = Backoff::new(settings.initial_backoff);
    loop {
        let delay = match probe(&endpoint, &settings, clock.as_ref()).await {
            Ok((request_time, response_time, peer_millis)) => {
                backoff.reset();
                if let Some(sample) = state.offer(request_time, response_time, peer_millis) {
                    tracing::debug!(
                        endpoint = %endpoint.id(),
                        protocol = P::NAME,
                        ping_ms = sample.ping,
                        diff_ms = sample.diff,
                        "accepted clock sample"
                    );
                    if let Some(manager) = endpoint.metadata() {
                        manager.update_endpoint_ping(endpoint.id(), sample.ping);
                    }
                    samples.send_replace(Some(sample));
                    on_sample(sample);
                }
                settings.interval
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::debug!(
                    endpoint = %endpoint.id(),
                    protocol = P::NAME,
                    error = %e,
                    retry_ms = delay.as_millis() as u64,
                    "ping failed"
                );
                delay
            }
        };
        tokio::time::sleep(delay).await;
    }
}

/// One round trip. Returns local send time, local receive time and the
/// peer's timestamp.
async fn probe<P: PingProtocol>(
    endpoint: &Endpoint<P>,
    settings: &PingSettings,
    clock: &dyn Clock,
) -> Result<(f64, f64, f64), RequestError> {
    let request_time = clock.now_millis();
    let response = match tokio::time::timeout(settings.timeout, endpoint.request(P::ping_request())).await {
        Ok(result) => result?,
        Err(_) => return Err(RequestError::Timeout(settings.timeout)),
    };
    let response_time = clock.now_millis();
    let peer_millis = P::pong_timestamp(&response)
        .ok_or_else(|| RequestError::UnexpectedResponse(format!("expected pong, got {response:?}")))?;
    Ok((request_time, response_time, peer_millis))
}
