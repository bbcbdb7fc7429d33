//! Monotonic millisecond clocks
//!
//! Ping timestamps only need to be comparable on the machine that produced
//! them, so any monotonic source works.

use parking_lot::Mutex;
use tokio::time::Instant;

/// Source of monotonic time in milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Milliseconds elapsed since the clock was created.
///
/// Backed by tokio's `Instant`, so it follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_ms: Mutex::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: f64) {
        *self.now_ms.lock() = now_ms;
    }

    pub fn advance(&self, delta_ms: f64) {
        *self.now_ms.lock() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now_ms.lock()
    }
}
