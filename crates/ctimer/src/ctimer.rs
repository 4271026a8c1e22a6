use core::cell::{RefCell, RefMut};
use core::fmt;
use std::sync::Arc;

use critical_section::{CriticalSection, Mutex};
use etimer::{Etimer, EtimerRef};
use pt::{Context, ProcessRef, TimerId};

/// Work run when a callback timer fires, in the owner's context.
pub type Callback = Box<dyn FnMut(&mut Context<'_>) + Send>;

#[derive(Default)]
pub(crate) struct CtimerState {
    /// Requested interval, kept for arming once the service is running.
    pub(crate) interval: u32,
    pub(crate) owner: Option<ProcessRef>,
    pub(crate) callback: Option<Callback>,
}

/// One-shot timer that runs a callback instead of posting an event.
pub struct Ctimer {
    etimer: EtimerRef,
    state: Mutex<RefCell<CtimerState>>,
}

pub type CtimerRef = Arc<Ctimer>;

impl Ctimer {
    pub fn new() -> CtimerRef {
        Arc::new(Self {
            etimer: Etimer::new(),
            state: Mutex::new(RefCell::new(CtimerState::default())),
        })
    }

    /// Identity shared with the embedded elapsed timer.
    pub fn id(&self) -> TimerId {
        self.etimer.id()
    }

    pub fn etimer(&self) -> &EtimerRef {
        &self.etimer
    }

    pub fn interval(&self) -> u32 {
        critical_section::with(|cs| self.state_in(cs).interval)
    }

    /// Process whose context the callback runs in.
    pub fn owner(&self) -> Option<ProcessRef> {
        critical_section::with(|cs| self.state_in(cs).owner.clone())
    }
}

impl Ctimer {
    pub(crate) fn state_in<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, CtimerState> {
        self.state.borrow_ref_mut(cs)
    }
}

impl fmt::Debug for Ctimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (interval, owner, armed) = critical_section::with(|cs| {
            let state = self.state_in(cs);
            (state.interval, state.owner.as_ref().map(|p| p.id()), state.callback.is_some())
        });
        f.debug_struct("Ctimer")
            .field("id", &self.id())
            .field("interval", &interval)
            .field("owner", &owner)
            .field("has_callback", &armed)
            .finish()
    }
}
