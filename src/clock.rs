//! Time sources.
//!
//! The state machines only ever see plain millisecond values; this module is
//! where those values come from. `SystemClock` is used by the daemon,
//! `ManualClock` by tests that need to step time precisely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds on a monotonic timeline. Only differences are meaningful.
pub type MonoMillis = u64;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = u64;

pub trait Clock: Send {
    /// Monotonic time used for debounce and hold durations.
    fn monotonic_ms(&self) -> MonoMillis;

    /// Wall-clock time used for session and capture timestamps.
    fn epoch_ms(&self) -> EpochMillis;
}

#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> MonoMillis {
        self.origin.elapsed().as_millis() as u64
    }

    fn epoch_ms(&self) -> EpochMillis {
        // A wall clock before 1970 is treated as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock. Clones share the same timeline.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    mono: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(epoch_start: EpochMillis) -> Self {
        Self {
            mono: Arc::new(AtomicU64::new(0)),
            epoch: Arc::new(AtomicU64::new(epoch_start)),
        }
    }

    /// Move both timelines forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.mono.fetch_add(ms, Ordering::SeqCst);
        self.epoch.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> MonoMillis {
        self.mono.load(Ordering::SeqCst)
    }

    fn epoch_ms(&self) -> EpochMillis {
        self.epoch.load(Ordering::SeqCst)
    }
}
