//! Periodic tick thread.
//!
//! The thread sleeps to absolute deadlines measured from a monotonic start,
//! so a late wakeup shortens the next sleep instead of shifting every later
//! tick.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

/// Tick rate used when none is configured.
pub const DEFAULT_TICKS_PER_SEC: u32 = 100;

/// Highest supported tick rate.
pub const MAX_TICKS_PER_SEC: u32 = 10_000;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Length of one tick at `rate_hz`.
///
/// # Panics
///
/// Panics if `rate_hz` is zero or above [`MAX_TICKS_PER_SEC`].
pub fn tick_period(rate_hz: u32) -> Duration {
    assert!(rate_hz > 0, "tick rate must be greater than 0");
    assert!(rate_hz <= MAX_TICKS_PER_SEC, "tick rate too high (max 10kHz)");
    Duration::from_nanos(NSEC_PER_SEC / u64::from(rate_hz))
}

/// Invokes a callback once per tick on a dedicated thread until stopped.
pub struct Ticker {
    period: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<F>(rate_hz: u32, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let period = tick_period(rate_hz);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new().name("pt:ticker".into()).spawn(move || {
            let mut next_tick = Instant::now();
            while flag.load(Ordering::Relaxed) {
                next_tick += period;
                let now = Instant::now();
                if next_tick > now {
                    thread::sleep(next_tick - now);
                }
                if flag.load(Ordering::Relaxed) {
                    on_tick();
                }
            }
        })?;
        debug!("ticker running at {rate_hz} Hz");

        Ok(Self {
            period,
            running,
            handle: Some(handle),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stops the thread and waits for it. No callback runs afterwards.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tick_period_matches_rate() {
        assert_eq!(tick_period(100), Duration::from_millis(10));
        assert_eq!(tick_period(1000), Duration::from_micros(1000));
    }

    #[test]
    #[should_panic(expected = "too high")]
    fn excessive_rate_is_rejected() {
        tick_period(MAX_TICKS_PER_SEC + 1);
    }

    #[test]
    fn ticker_invokes_callback_at_its_rate() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut ticker = Ticker::start(100, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        ticker.stop();
        let ticks = count.load(Ordering::SeqCst);
        assert!((5..=15).contains(&ticks), "expected ~10 ticks, got {ticks}");

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), ticks);
        assert!(!ticker.is_running());
    }
}
