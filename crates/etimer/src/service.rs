//! The elapsed-timer service process.
//!
//! Outstanding timers live in one unordered list owned by the service. The
//! list is swept whenever the service process receives a POLL: every timer
//! whose deadline has passed is reported to its owner with a TIMER event and
//! dropped from the list. A POLL is requested each time a timer is armed and
//! by the tick source through [`EtimerService::on_tick`].

use core::cell::RefCell;
use core::fmt;
use std::sync::Arc;

use critical_section::{CriticalSection, Mutex};
use log::{debug, trace, warn};
use pt::trace::records;
use pt::{
    Context, Event, EventKind, Kernel, KernelError, Payload, PostError, Process, ProcessId,
    ProcessRef, Routine, Step, TimerId,
};

use crate::clock::{Clock, Tick};
use crate::timer::{EtimerRef, TimerState};

pub(crate) struct TimerList {
    clock: Arc<dyn Clock>,
    state: Mutex<RefCell<ListState>>,
}

#[derive(Default)]
struct ListState {
    timers: Vec<EtimerRef>,
    /// Earliest deadline among `timers`; `None` while the list is empty.
    next_expiration: Option<Tick>,
}

impl ListState {
    fn position(&self, timer: &EtimerRef) -> Option<usize> {
        self.timers.iter().position(|listed| Arc::ptr_eq(listed, timer))
    }

    fn refresh(&mut self, cs: CriticalSection<'_>, now: Tick) {
        self.next_expiration = self
            .timers
            .iter()
            .map(|timer| {
                let state = timer.state_in(cs);
                now.distance_to(state.start.wrapping_add(state.interval))
            })
            .min()
            .map(|distance| now.wrapping_add_signed(distance));
    }
}

enum Swept {
    Posted { timer: TimerId, owner: ProcessId },
    Orphaned { timer: TimerId, cause: Option<PostError> },
    Deferred(TimerId),
}

impl TimerList {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(RefCell::new(ListState::default())),
        }
    }

    /// Posts TIMER for every due timer, rescanning from the head after each
    /// one is handled.
    ///
    /// The post runs outside the critical section. A timer is only retired
    /// afterwards if it is still listed, still due and still owned by the
    /// process that was notified; a timer re-armed in between stays listed.
    fn sweep(&self, cx: &Context<'_>) {
        loop {
            let due = critical_section::with(|cs| {
                let list = self.state.borrow_ref(cs);
                let now = self.clock.now();
                list.timers
                    .iter()
                    .find(|timer| timer.is_due_in(cs, now))
                    .map(|timer| (Arc::clone(timer), timer.state_in(cs).owner.clone()))
            });
            let Some((timer, owner)) = due else {
                break;
            };

            let outcome = match &owner {
                Some(owner) => match cx.kernel().post(owner, EventKind::TIMER, Payload::Timer(timer.id())) {
                    Ok(()) => Swept::Posted {
                        timer: timer.id(),
                        owner: owner.id(),
                    },
                    Err(err) if err.is_exhausted() => Swept::Deferred(timer.id()),
                    Err(err) => Swept::Orphaned {
                        timer: timer.id(),
                        cause: Some(err),
                    },
                },
                None => Swept::Orphaned {
                    timer: timer.id(),
                    cause: None,
                },
            };

            if let Swept::Deferred(id) = outcome {
                warn!("{id} expired while the event pool is exhausted; retrying on next poll");
                if let Err(err) = cx.poll(cx.process()) {
                    debug!("sweep retry not queued: {err}");
                }
                break;
            }
            self.retire(&timer, owner.as_ref());

            match outcome {
                Swept::Posted { timer, owner } => {
                    trace!("{timer} expired, notified {owner}");
                    let mut note = [0u8; 6];
                    note[..4].copy_from_slice(&timer.raw().to_le_bytes());
                    note[4..].copy_from_slice(&owner.raw().to_le_bytes());
                    cx.kernel().emit_trace(records::ETIMER_POST, &note);
                }
                Swept::Orphaned { timer, cause } => match cause {
                    Some(err) => warn!("{timer} expired for a departed owner: {err}"),
                    None => warn!("{timer} was listed without an owner"),
                },
                Swept::Deferred(_) => {}
            }
        }
    }

    /// Unlinks a reported timer and marks it expired, unless it was stopped or
    /// re-armed while its owner was being notified.
    fn retire(&self, timer: &EtimerRef, notified: Option<&ProcessRef>) {
        critical_section::with(|cs| {
            let mut list = self.state.borrow_ref_mut(cs);
            let now = self.clock.now();
            let Some(index) = list.position(timer) else {
                return;
            };
            let unchanged = {
                let state = timer.state_in(cs);
                let same_owner = match (&state.owner, notified) {
                    (Some(current), Some(notified)) => Arc::ptr_eq(current, notified),
                    (None, None) => true,
                    _ => false,
                };
                same_owner && now.elapsed_since(state.start) >= state.interval
            };
            if unchanged {
                list.timers.remove(index);
                timer.state_in(cs).owner = None;
                list.refresh(cs, now);
            }
        });
    }

    /// Drops every timer owned by `departed`. Its owner gets no TIMER for them.
    fn purge(&self, cx: &Context<'_>, departed: ProcessId) {
        let purged = critical_section::with(|cs| {
            let mut list = self.state.borrow_ref_mut(cs);
            let before = list.timers.len();
            list.timers.retain(|timer| {
                if timer.is_owned_by_in(cs, departed) {
                    timer.state_in(cs).owner = None;
                    false
                } else {
                    true
                }
            });
            let purged = before - list.timers.len();
            if purged > 0 {
                list.refresh(cs, self.clock.now());
            }
            purged
        });

        if purged > 0 {
            debug!("purged {purged} timer(s) of departed {departed}");
            let mut note = [0u8; 4];
            note[..2].copy_from_slice(&departed.raw().to_le_bytes());
            note[2..].copy_from_slice(&(purged as u16).to_le_bytes());
            cx.kernel().emit_trace(records::ETIMER_PURGE, &note);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
enum Site {
    #[default]
    Init,
    Serve,
}

struct EtimerRoutine {
    list: Arc<TimerList>,
}

impl Routine for EtimerRoutine {
    type Site = Site;

    fn resume(&mut self, site: Site, cx: &mut Context<'_>, event: &Event) -> Step<Site> {
        if let Site::Init = site {
            debug!("elapsed-timer service running as {}", cx.id());
            return Step::Yield(Site::Serve);
        }

        match event.kind {
            EventKind::EXITED => {
                if let Some(departed) = event.payload.process() {
                    self.list.purge(cx, departed);
                }
            }
            EventKind::POLL => self.list.sweep(cx),
            _ => {}
        }
        Step::Yield(Site::Serve)
    }
}

/// Handle to a running elapsed-timer service.
///
/// Every arming operation names the process that receives the TIMER event.
/// Inside a routine that is usually `cx.process()`.
pub struct EtimerService {
    kernel: Arc<Kernel>,
    list: Arc<TimerList>,
    process: ProcessRef,
}

impl EtimerService {
    pub const PROCESS_NAME: &'static str = "event timer";

    /// Registers the service process with `kernel`.
    pub fn start(kernel: &Arc<Kernel>, clock: Arc<dyn Clock>) -> Result<Arc<Self>, KernelError> {
        let list = Arc::new(TimerList::new(clock));
        let process = Process::new(
            Self::PROCESS_NAME,
            EtimerRoutine {
                list: Arc::clone(&list),
            },
        );
        kernel.start(&process, Payload::None)?;

        Ok(Arc::new(Self {
            kernel: Arc::clone(kernel),
            list,
            process,
        }))
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// The service's own process.
    pub fn process(&self) -> &ProcessRef {
        &self.process
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.list.clock
    }

    pub fn now(&self) -> Tick {
        self.list.clock.now()
    }

    /// Arms `timer` to expire `interval` ticks from now.
    pub fn set(&self, timer: &EtimerRef, interval: u32, owner: &ProcessRef) {
        self.arm(timer, owner, |state, now| {
            state.start = now;
            state.interval = interval;
        });
    }

    /// Re-arms `timer` one interval after its previous start, keeping a
    /// periodic timer in phase however late the previous expiry was handled.
    pub fn reset(&self, timer: &EtimerRef, owner: &ProcessRef) {
        self.arm(timer, owner, |state, _now| {
            state.start = state.start.wrapping_add(state.interval);
        });
    }

    /// Like [`reset`](Self::reset), then stores `interval` for this and later
    /// periods.
    pub fn reset_with_new_interval(&self, timer: &EtimerRef, interval: u32, owner: &ProcessRef) {
        self.arm(timer, owner, |state, _now| {
            state.start = state.start.wrapping_add(state.interval);
            state.interval = interval;
        });
    }

    /// Re-arms `timer` from now with its current interval.
    pub fn restart(&self, timer: &EtimerRef, owner: &ProcessRef) {
        self.arm(timer, owner, |state, now| {
            state.start = now;
        });
    }

    /// Shifts the start of `timer` by `delta` ticks.
    pub fn adjust(&self, timer: &EtimerRef, delta: i32) {
        let now = self.now();
        critical_section::with(|cs| {
            let mut list = self.list.state.borrow_ref_mut(cs);
            {
                let mut state = timer.state_in(cs);
                state.start = state.start.wrapping_add_signed(delta);
            }
            list.refresh(cs, now);
        });
    }

    /// Unlinks `timer`; it will not be reported.
    pub fn stop(&self, timer: &EtimerRef) {
        let now = self.now();
        let was_listed = critical_section::with(|cs| {
            let mut list = self.list.state.borrow_ref_mut(cs);
            timer.state_in(cs).owner = None;
            match list.position(timer) {
                Some(index) => {
                    list.timers.remove(index);
                    list.refresh(cs, now);
                    true
                }
                None => false,
            }
        });

        if was_listed {
            trace!("{} stopped", timer.id());
            self.kernel
                .emit_trace(records::ETIMER_STOP, &timer.id().raw().to_le_bytes());
        }
    }

    pub fn expired(&self, timer: &EtimerRef) -> bool {
        timer.is_expired()
    }

    pub fn expiration_time(&self, timer: &EtimerRef) -> Tick {
        timer.expiration_time()
    }

    pub fn start_time(&self, timer: &EtimerRef) -> Tick {
        timer.start_time()
    }

    /// True while any timer is outstanding.
    pub fn pending(&self) -> bool {
        critical_section::with(|cs| !self.list.state.borrow_ref(cs).timers.is_empty())
    }

    pub fn outstanding(&self) -> usize {
        critical_section::with(|cs| self.list.state.borrow_ref(cs).timers.len())
    }

    /// Earliest deadline among outstanding timers.
    pub fn next_expiration(&self) -> Option<Tick> {
        critical_section::with(|cs| self.list.state.borrow_ref(cs).next_expiration)
    }

    /// Asks the service to sweep.
    pub fn request_poll(&self) {
        if let Err(err) = self.kernel.poll(&self.process) {
            debug!("elapsed-timer poll not queued: {err}");
        }
    }

    /// Tick-source hook: requests a sweep once the earliest deadline is
    /// reached. Returns whether a sweep was requested.
    pub fn on_tick(&self) -> bool {
        let now = self.now();
        let due = self
            .next_expiration()
            .is_some_and(|next| now.distance_to(next) <= 0);
        if due {
            self.request_poll();
        }
        due
    }
}

impl EtimerService {
    fn arm(&self, timer: &EtimerRef, owner: &ProcessRef, update: impl FnOnce(&mut TimerState, Tick)) {
        let now = self.now();
        let interval = critical_section::with(|cs| {
            let mut list = self.list.state.borrow_ref_mut(cs);
            let interval = {
                let mut state = timer.state_in(cs);
                update(&mut state, now);
                state.owner = Some(Arc::clone(owner));
                state.interval
            };
            if list.position(timer).is_none() {
                list.timers.insert(0, Arc::clone(timer));
            }
            list.refresh(cs, now);
            interval
        });

        trace!("{} armed for `{}`: {interval} ticks", timer.id(), owner.name());
        let mut note = [0u8; 8];
        note[..4].copy_from_slice(&timer.id().raw().to_le_bytes());
        note[4..].copy_from_slice(&interval.to_le_bytes());
        self.kernel.emit_trace(records::ETIMER_ARM, &note);

        self.request_poll();
    }
}

impl fmt::Debug for EtimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtimerService")
            .field("process", &self.process.id())
            .field("outstanding", &self.outstanding())
            .field("next_expiration", &self.next_expiration())
            .finish()
    }
}
