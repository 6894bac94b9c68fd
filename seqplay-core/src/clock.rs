//! Time source for the playback thread
//!
//! Every "now" timestamp and every sleep goes through a [`Clock`], so tests
//! can swap real time for a [`VirtualClock`] that advances instantly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time in milliseconds (high resolution)
    fn now_ms(&self) -> f64;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);

    /// Monotonic time in seconds, used to stamp outgoing messages
    fn now_secs(&self) -> f64 {
        self.now_ms() * 0.001
    }
}

/// Real time, measured from the clock's creation
#[derive(Debug, Clone, Copy)]
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
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock: sleeping advances time immediately
#[derive(Debug, Default)]
pub struct VirtualClock {
    nanos: AtomicU64,
    sleeps: AtomicU64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping
    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Number of `sleep` calls so far
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> f64 {
        self.nanos.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}
