use core::cell::RefCell;
use core::fmt;
use std::sync::Arc;

use critical_section::{CriticalSection, Mutex};
use pt::{ProcessId, ProcessRef, TimerId};

use crate::clock::Tick;

#[derive(Default)]
pub(crate) struct TimerState {
    pub(crate) start: Tick,
    pub(crate) interval: u32,
    /// `None` once expired or stopped; set exactly while the timer is listed.
    pub(crate) owner: Option<ProcessRef>,
}

/// A deadline of `start + interval` ticks, reported to its owner as a TIMER
/// event carrying [`Etimer::id`].
///
/// Timers are caller-owned and armed through an
/// [`EtimerService`](crate::EtimerService).
pub struct Etimer {
    id: TimerId,
    state: Mutex<RefCell<TimerState>>,
}

pub type EtimerRef = Arc<Etimer>;

impl Etimer {
    pub fn new() -> EtimerRef {
        Arc::new(Self {
            id: TimerId::next(),
            state: Mutex::new(RefCell::new(TimerState::default())),
        })
    }

    /// Identity carried by this timer's TIMER events.
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn start_time(&self) -> Tick {
        self.with_state(|state| state.start)
    }

    pub fn interval(&self) -> u32 {
        self.with_state(|state| state.interval)
    }

    pub fn expiration_time(&self) -> Tick {
        self.with_state(|state| state.start.wrapping_add(state.interval))
    }

    /// True unless the timer is armed and waiting to fire.
    pub fn is_expired(&self) -> bool {
        self.with_state(|state| state.owner.is_none())
    }

    pub fn owner(&self) -> Option<ProcessRef> {
        self.with_state(|state| state.owner.clone())
    }
}

impl Etimer {
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut TimerState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    pub(crate) fn state_in<'cs>(&'cs self, cs: CriticalSection<'cs>) -> core::cell::RefMut<'cs, TimerState> {
        self.state.borrow_ref_mut(cs)
    }

    pub(crate) fn is_due_in(&self, cs: CriticalSection<'_>, now: Tick) -> bool {
        let state = self.state.borrow_ref(cs);
        now.elapsed_since(state.start) >= state.interval
    }

    pub(crate) fn is_owned_by_in(&self, cs: CriticalSection<'_>, id: ProcessId) -> bool {
        self.state
            .borrow_ref(cs)
            .owner
            .as_ref()
            .is_some_and(|owner| owner.id() == id)
    }
}

impl fmt::Debug for Etimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (start, interval, owner) =
            self.with_state(|state| (state.start, state.interval, state.owner.as_ref().map(|p| p.id())));
        f.debug_struct("Etimer")
            .field("id", &self.id)
            .field("start", &start)
            .field("interval", &interval)
            .field("owner", &owner)
            .finish()
    }
}
