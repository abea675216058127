//! Wall-clock source for protocol timestamps.
//!
//! Everything that stamps or compares times goes through [`Clock`] so that
//! clock-offset arithmetic can be tested with fixed, skewed clocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch, as this node sees it.
    fn now_millis(&self) -> f64;
}

pub type SharedClock = Arc<dyn Clock>;

/// The operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    // f64 bits
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: f64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicU64::new(millis.to_bits()),
        })
    }

    pub fn set(&self, millis: f64) {
        self.millis.store(millis.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, millis: f64) {
        self.set(self.now_millis() + millis);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> f64 {
        f64::from_bits(self.millis.load(Ordering::SeqCst))
    }
}
