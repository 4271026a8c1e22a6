//! Resumable routines.
//!
//! A routine is written as an explicit state machine over its suspension
//! sites. Each call to [`Routine::resume`] receives the site recorded by the
//! previous call together with the delivered event, runs forward without
//! blocking, and returns a [`Step`] naming the next site or a terminal
//! outcome. One OS stack therefore serves any number of suspension points.
//!
//! ```ignore
//! #[derive(Debug, Default, Clone, Copy)]
//! enum Site {
//!     #[default]
//!     Start,
//!     AwaitTimer,
//! }
//!
//! impl Routine for Blinker {
//!     type Site = Site;
//!
//!     fn resume(&mut self, site: Site, cx: &mut Context<'_>, ev: &Event) -> Step<Site> {
//!         match site {
//!             Site::Start => {
//!                 self.etimers.set(&self.timer, 50, cx.process());
//!                 Step::Yield(Site::AwaitTimer)
//!             }
//!             Site::AwaitTimer => {
//!                 yield_until!(Site::AwaitTimer, ev.kind == EventKind::TIMER);
//!                 self.toggle();
//!                 self.etimers.reset(&self.timer, cx.process());
//!                 Step::Yield(Site::AwaitTimer)
//!             }
//!         }
//!     }
//! }
//! ```

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::kernel::Context;

/// Outcome of one routine step as seen by the dispatcher.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtState {
    Waiting,
    Yielded,
    Exited,
    Ended,
}

impl PtState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Ended)
    }
}

/// What a routine returns from one resumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<S> {
    /// Blocked on a condition; resume at the given site.
    Wait(S),
    /// Voluntarily gave up the processor; resume at the given site.
    Yield(S),
    /// Left early.
    Exit,
    /// Ran to completion.
    End,
}

impl<S> Step<S> {
    pub fn state(&self) -> PtState {
        match self {
            Self::Wait(_) => PtState::Waiting,
            Self::Yield(_) => PtState::Yielded,
            Self::Exit => PtState::Exited,
            Self::End => PtState::Ended,
        }
    }

    pub fn site(&self) -> Option<&S> {
        match self {
            Self::Wait(site) | Self::Yield(site) => Some(site),
            Self::Exit | Self::End => None,
        }
    }
}

pub trait Routine: Send + 'static {
    /// Finite set of suspension sites. `Default` is the entry site.
    type Site: Copy + Default + fmt::Debug + Send + 'static;

    fn resume(&mut self, site: Self::Site, cx: &mut Context<'_>, event: &Event) -> Step<Self::Site>;
}

/// Object-safe view of a routine together with its saved site.
pub trait Resumable: Send {
    fn step(&mut self, cx: &mut Context<'_>, event: &Event) -> PtState;

    /// Forgets the saved site so the next step starts from the entry site.
    fn rewind(&mut self);

    fn site_debug(&self) -> String;
}

pub struct Protothread<R: Routine> {
    routine: R,
    site: R::Site,
    finished: bool,
}

impl<R: Routine> Protothread<R> {
    pub fn new(routine: R) -> Self {
        Self {
            routine,
            site: R::Site::default(),
            finished: false,
        }
    }

    pub fn site(&self) -> R::Site {
        self.site
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn routine(&self) -> &R {
        &self.routine
    }

    pub fn routine_mut(&mut self) -> &mut R {
        &mut self.routine
    }
}

impl<R: Routine> Resumable for Protothread<R> {
    fn step(&mut self, cx: &mut Context<'_>, event: &Event) -> PtState {
        if self.finished {
            return PtState::Ended;
        }

        let step = self.routine.resume(self.site, cx, event);
        let state = step.state();
        match step {
            Step::Wait(site) | Step::Yield(site) => self.site = site,
            Step::Exit | Step::End => self.finished = true,
        }
        state
    }

    fn rewind(&mut self) {
        self.site = R::Site::default();
        self.finished = false;
    }

    fn site_debug(&self) -> String {
        format!("{:?}", self.site)
    }
}

/// Single-site routine built from a closure, see [`from_fn`].
pub struct FnRoutine<F> {
    handler: F,
}

/// Wraps a closure that handles every event at one suspension site.
///
/// The closure is invoked for INIT as well, so it sees the start payload.
pub fn from_fn<F>(handler: F) -> FnRoutine<F>
where
    F: FnMut(&mut Context<'_>, &Event) -> Step<()> + Send + 'static,
{
    FnRoutine { handler }
}

impl<F> Routine for FnRoutine<F>
where
    F: FnMut(&mut Context<'_>, &Event) -> Step<()> + Send + 'static,
{
    type Site = ();

    fn resume(&mut self, _site: (), cx: &mut Context<'_>, event: &Event) -> Step<()> {
        (self.handler)(cx, event)
    }
}

/// Stays suspended at `$site` until `$cond` holds.
///
/// Evaluated on every event delivered while parked at the site; an event that
/// does not satisfy the condition leaves the routine where it was.
#[macro_export]
macro_rules! yield_until {
    ($site:expr, $cond:expr) => {
        if !($cond) {
            return $crate::Step::Yield($site);
        }
    };
}

/// Like [`yield_until!`] but reports the suspension as waiting.
#[macro_export]
macro_rules! wait_until {
    ($site:expr, $cond:expr) => {
        if !($cond) {
            return $crate::Step::Wait($site);
        }
    };
}
