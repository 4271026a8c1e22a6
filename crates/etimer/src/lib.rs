//! # etimer
//!
//! Elapsed-time timers for `pt` processes.
//!
//! An [`Etimer`] is a deadline of `start + interval` ticks. Armed timers are
//! kept by the [`EtimerService`], itself a process, which sweeps them on each
//! POLL and reports expiry to the owning process as a TIMER event whose
//! payload is the timer's [`TimerId`](pt::TimerId). Tick arithmetic wraps, so
//! the tick counter may overflow freely.
//!
//! - [`clock`] – wrapping [`Tick`] values and the [`Clock`] tick source.
//! - [`EtimerService`] – arming, stopping, querying and sweeping.

pub mod clock;
mod service;
mod timer;

pub use clock::{Clock, ManualClock, Tick};
pub use service::EtimerService;
pub use timer::{Etimer, EtimerRef};

#[cfg(test)]
mod tests;
