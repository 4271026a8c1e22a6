//! Tick counter and tick sources.

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Value of a free-running tick counter that wraps at 2^32.
///
/// Ticks are only comparable through their distance, so there is no
/// ordering on the type itself.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tick(pub u32);

impl Tick {
    pub const ZERO: Self = Self(0);

    pub const fn new(ticks: u32) -> Self {
        Self(ticks)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn wrapping_add(self, ticks: u32) -> Self {
        Self(self.0.wrapping_add(ticks))
    }

    pub const fn wrapping_add_signed(self, delta: i32) -> Self {
        Self(self.0.wrapping_add_signed(delta))
    }

    /// Ticks elapsed from `earlier` to `self`, modulo 2^32.
    pub const fn elapsed_since(self, earlier: Tick) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Signed distance from `self` to `later`; negative once `later` has passed.
    pub const fn distance_to(self, later: Tick) -> i32 {
        later.0.wrapping_sub(self.0) as i32
    }

    /// True if `self` lies after `other` within half the counter range.
    pub const fn is_after(self, other: Tick) -> bool {
        other.distance_to(self) > 0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

/// Monotonic tick source.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Tick;
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start: Tick) -> Self {
        Self {
            now: AtomicU32::new(start.raw()),
        }
    }

    pub fn advance(&self, ticks: u32) -> Tick {
        let previous = self.now.fetch_add(ticks, Ordering::AcqRel);
        Tick(previous.wrapping_add(ticks))
    }

    pub fn set(&self, now: Tick) {
        self.now.store(now.raw(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        Tick(self.now.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_correct_across_wraparound() {
        let before = Tick(u32::MAX - 5);
        let after = before.wrapping_add(10);

        assert_eq!(after, Tick(4));
        assert_eq!(after.elapsed_since(before), 10);
        assert_eq!(before.distance_to(after), 10);
        assert_eq!(after.distance_to(before), -10);
        assert!(after.is_after(before));
        assert!(!before.is_after(after));
    }

    #[test]
    fn signed_adjustment_wraps() {
        assert_eq!(Tick(3).wrapping_add_signed(-5), Tick(u32::MAX - 1));
        assert_eq!(Tick(u32::MAX).wrapping_add_signed(2), Tick(1));
    }

    #[test]
    fn manual_clock_advances_and_wraps() {
        let clock = ManualClock::new(Tick(u32::MAX));
        assert_eq!(clock.advance(1), Tick(0));
        assert_eq!(clock.now(), Tick(0));
        clock.set(Tick(77));
        assert_eq!(clock.now(), Tick(77));
    }
}
