//! Callback timers.
//!
//! A [`Ctimer`] runs a closure once its interval has elapsed, instead of
//! posting an event. Closures run inside the callback-timer service process
//! but see their owning process as the current one, so anything they post
//! comes from the owner.
//!
//! ```ignore
//! let ctimers = CtimerService::new(&kernel);
//! ctimers.start(&etimers)?;
//!
//! let blink = Ctimer::new();
//! ctimers.set_with_process(&blink, 50, Some(&led), |cx| {
//!     let _ = cx.post(cx.process(), EventKind::MSG, Payload::None);
//! });
//! ```

mod ctimer;
mod service;

pub use crate::ctimer::{Callback, Ctimer, CtimerRef};
pub use crate::service::CtimerService;

#[cfg(test)]
mod tests;
