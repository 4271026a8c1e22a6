//! Monotonic tick source.

use std::time::{Duration, Instant};

use etimer::{Clock, Tick};

use crate::time::tick_period;

/// Counts ticks at a fixed rate since construction, wrapping modulo 2^32.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
    rate_hz: u32,
}

impl SystemClock {
    pub fn new(rate_hz: u32) -> Self {
        assert!(rate_hz > 0, "tick rate must be greater than 0");
        Self {
            origin: Instant::now(),
            rate_hz,
        }
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    pub fn period(&self) -> Duration {
        tick_period(self.rate_hz)
    }

    /// Whole ticks covered by `duration`.
    pub fn ticks_in(&self, duration: Duration) -> u32 {
        (duration.as_nanos() * u128::from(self.rate_hz) / 1_000_000_000) as u32
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Tick {
        Tick(self.ticks_in(self.origin.elapsed()))
    }
}
