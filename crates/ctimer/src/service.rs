//! The callback-timer service process.
//!
//! Every callback timer embeds an elapsed timer owned by the service
//! process. When that elapsed timer fires, the service looks the callback
//! timer up and runs its callback in the context of the timer's owner.
//!
//! Timers armed before the service runs are only recorded; the service arms
//! each of them, measured from its own start, once it receives INIT.

use core::cell::RefCell;
use core::fmt;
use std::sync::Arc;

use critical_section::{CriticalSection, Mutex};
use etimer::EtimerService;
use log::{debug, trace};
use once_cell::sync::OnceCell;
use pt::trace::records;
use pt::{
    Context, Event, EventKind, Kernel, KernelError, Payload, Process, ProcessId, ProcessRef, Routine,
    Step, TimerId,
};

use crate::ctimer::{Callback, CtimerRef};

#[derive(Clone)]
struct Binding {
    etimers: Arc<EtimerService>,
    process: ProcessRef,
}

#[derive(Default)]
struct RegistryState {
    timers: Vec<CtimerRef>,
    /// Set once the service process has handled INIT.
    binding: Option<Binding>,
}

impl RegistryState {
    fn position(&self, timer: &CtimerRef) -> Option<usize> {
        self.timers.iter().position(|listed| Arc::ptr_eq(listed, timer))
    }

    fn unlink(&mut self, timer: &CtimerRef) -> bool {
        match self.position(timer) {
            Some(index) => {
                self.timers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Appends `timer`, moving it to the tail if already listed.
    fn append(&mut self, timer: &CtimerRef) {
        self.unlink(timer);
        self.timers.push(Arc::clone(timer));
    }
}

struct Registry {
    state: Mutex<RefCell<RegistryState>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            state: Mutex::new(RefCell::new(RegistryState::default())),
        }
    }
}

struct Fired {
    timer: CtimerRef,
    owner: Option<ProcessRef>,
    callback: Option<Callback>,
}

impl Registry {
    fn with<R>(&self, f: impl FnOnce(CriticalSection<'_>, &mut RegistryState) -> R) -> R {
        critical_section::with(|cs| f(cs, &mut self.state.borrow_ref_mut(cs)))
    }

    /// Publishes the binding, then arms every recorded timer. Returns how
    /// many timers were armed.
    fn bind(&self, binding: Binding) -> usize {
        let deferred: Vec<_> = self.with(|cs, registry| {
            registry.binding = Some(binding.clone());
            registry
                .timers
                .iter()
                .map(|timer| (Arc::clone(timer), timer.state_in(cs).interval))
                .collect()
        });
        for (timer, interval) in &deferred {
            binding.etimers.set(timer.etimer(), *interval, &binding.process);
        }
        deferred.len()
    }

    /// Unlinks the timer whose elapsed timer is `id`. Callback timers are
    /// one-shot.
    fn take(&self, id: TimerId) -> Option<Fired> {
        self.with(|cs, registry| {
            let index = registry.timers.iter().position(|timer| timer.id() == id)?;
            let timer = registry.timers.remove(index);
            let (owner, callback) = {
                let mut state = timer.state_in(cs);
                (state.owner.clone(), state.callback.take())
            };
            Some(Fired { timer, owner, callback })
        })
    }

    /// Drops every timer owned by `departed`, stopping its elapsed timer.
    fn purge(&self, departed: ProcessId) -> usize {
        let (dropped, binding) = self.with(|cs, registry| {
            let mut dropped = Vec::new();
            registry.timers.retain(|timer| {
                let owned = timer
                    .state_in(cs)
                    .owner
                    .as_ref()
                    .is_some_and(|owner| owner.id() == departed);
                if owned {
                    dropped.push(Arc::clone(timer));
                }
                !owned
            });
            (dropped, registry.binding.clone())
        });
        if let Some(binding) = binding {
            for timer in &dropped {
                binding.etimers.stop(timer.etimer());
            }
        }
        dropped.len()
    }
}

fn restore(timer: &CtimerRef, callback: Callback) {
    critical_section::with(|cs| {
        let mut state = timer.state_in(cs);
        // A callback that re-armed its own timer installed a replacement.
        if state.callback.is_none() {
            state.callback = Some(callback);
        }
    });
}

#[derive(Debug, Default, Clone, Copy)]
enum Site {
    #[default]
    Init,
    Armed,
}

struct CtimerRoutine {
    registry: Arc<Registry>,
    etimers: Arc<EtimerService>,
}

impl CtimerRoutine {
    fn fire(&self, cx: &Context<'_>, id: TimerId) {
        let Some(Fired { timer, owner, callback }) = self.registry.take(id) else {
            debug!("{id} has no callback timer");
            return;
        };
        let Some(mut callback) = callback else {
            return;
        };

        let owner = owner.unwrap_or_else(|| Arc::clone(cx.process()));
        if !owner.is_running() {
            debug!("{id} fired after `{}` exited; callback skipped", owner.name());
            restore(&timer, callback);
            return;
        }

        trace!("{id} running callback for `{}`", owner.name());
        let mut note = [0u8; 6];
        note[..4].copy_from_slice(&id.raw().to_le_bytes());
        note[4..].copy_from_slice(&owner.id().raw().to_le_bytes());
        cx.kernel().emit_trace(records::CTIMER_FIRE, &note);

        cx.kernel().with_context(&owner, |owner_cx| callback(owner_cx));
        restore(&timer, callback);

        // An owner that exited from its own callback sent EXITED while this
        // service was mid-step, so that notification was never delivered here.
        if !owner.is_running() {
            self.purge(owner.id());
        }
    }

    fn purge(&self, departed: ProcessId) {
        let purged = self.registry.purge(departed);
        if purged > 0 {
            debug!("dropped {purged} callback timer(s) of departed {departed}");
        }
    }
}

impl Routine for CtimerRoutine {
    type Site = Site;

    fn resume(&mut self, site: Site, cx: &mut Context<'_>, event: &Event) -> Step<Site> {
        match site {
            Site::Init => {
                let armed = self.registry.bind(Binding {
                    etimers: Arc::clone(&self.etimers),
                    process: Arc::clone(cx.process()),
                });
                debug!("callback-timer service running as {}, {armed} deferred timer(s) armed", cx.id());
                Step::Yield(Site::Armed)
            }
            Site::Armed => {
                if event.kind == EventKind::EXITED {
                    if let Some(departed) = event.payload.process() {
                        self.purge(departed);
                    }
                    return Step::Yield(Site::Armed);
                }

                pt::yield_until!(Site::Armed, event.kind == EventKind::TIMER);
                if let Some(id) = event.payload.timer() {
                    self.fire(cx, id);
                }
                Step::Yield(Site::Armed)
            }
        }
    }
}

/// Handle to the callback-timer service.
///
/// The handle exists before the service process does, so timers may be set
/// during system bring-up. They start counting once [`start`](Self::start)
/// has run the service's INIT.
pub struct CtimerService {
    kernel: Arc<Kernel>,
    registry: Arc<Registry>,
    process: OnceCell<ProcessRef>,
}

impl CtimerService {
    pub const PROCESS_NAME: &'static str = "ctimer";

    pub fn new(kernel: &Arc<Kernel>) -> Arc<Self> {
        Arc::new(Self {
            kernel: Arc::clone(kernel),
            registry: Arc::default(),
            process: OnceCell::new(),
        })
    }

    /// Starts the service process on top of `etimers`.
    pub fn start(&self, etimers: &Arc<EtimerService>) -> Result<(), KernelError> {
        let mut created = false;
        let process = self.process.get_or_init(|| {
            created = true;
            Process::new(
                Self::PROCESS_NAME,
                CtimerRoutine {
                    registry: Arc::clone(&self.registry),
                    etimers: Arc::clone(etimers),
                },
            )
        });
        if !created {
            return Err(KernelError::AlreadyStarted(process.id()));
        }
        self.kernel.start(process, Payload::None)
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// The service process, once [`start`](Self::start) has been called.
    pub fn process(&self) -> Option<&ProcessRef> {
        self.process.get()
    }

    /// True once the service has armed its deferred timers.
    pub fn is_initialized(&self) -> bool {
        self.registry.with(|_, registry| registry.binding.is_some())
    }

    /// Number of callback timers waiting to fire.
    pub fn registered(&self) -> usize {
        self.registry.with(|_, registry| registry.timers.len())
    }

    /// Arms `timer` to run `callback` after `interval` ticks, in the context
    /// of the currently running process.
    pub fn set<F>(&self, timer: &CtimerRef, interval: u32, callback: F)
    where
        F: FnMut(&mut Context<'_>) + Send + 'static,
    {
        let owner = Kernel::current();
        self.set_with_process(timer, interval, owner.as_ref(), callback);
    }

    /// Like [`set`](Self::set) with an explicit owner. Without one the
    /// callback runs in the service's own context.
    pub fn set_with_process<F>(&self, timer: &CtimerRef, interval: u32, owner: Option<&ProcessRef>, callback: F)
    where
        F: FnMut(&mut Context<'_>) + Send + 'static,
    {
        let (replaced, binding) = self.registry.with(|cs, registry| {
            let replaced = {
                let mut state = timer.state_in(cs);
                state.interval = interval;
                state.owner = owner.cloned();
                state.callback.replace(Box::new(callback))
            };
            registry.append(timer);
            (replaced, registry.binding.clone())
        });
        drop(replaced);
        if let Some(binding) = binding {
            binding.etimers.set(timer.etimer(), interval, &binding.process);
        }

        trace!(
            "{} set for {interval} ticks, owner {:?}",
            timer.id(),
            owner.map(|owner| owner.name())
        );
    }

    /// Re-arms `timer` one interval after its previous start, keeping its
    /// callback and owner.
    pub fn reset(&self, timer: &CtimerRef) {
        if let Some(binding) = self.relist(timer) {
            binding.etimers.reset(timer.etimer(), &binding.process);
        }
    }

    /// Re-arms `timer` from now, keeping its callback and owner.
    pub fn restart(&self, timer: &CtimerRef) {
        if let Some(binding) = self.relist(timer) {
            binding.etimers.restart(timer.etimer(), &binding.process);
        }
    }

    /// Cancels `timer`. Its callback will not run.
    pub fn stop(&self, timer: &CtimerRef) {
        let (was_listed, binding) = self
            .registry
            .with(|_, registry| (registry.unlink(timer), registry.binding.clone()));
        if let Some(binding) = binding {
            binding.etimers.stop(timer.etimer());
        }
        if was_listed {
            trace!("{} stopped", timer.id());
        }
    }

    fn relist(&self, timer: &CtimerRef) -> Option<Binding> {
        self.registry.with(|_, registry| {
            registry.append(timer);
            registry.binding.clone()
        })
    }

    /// True unless `timer` is waiting to fire.
    pub fn expired(&self, timer: &CtimerRef) -> bool {
        self.registry.with(|_, registry| match registry.binding {
            Some(_) => timer.etimer().is_expired(),
            None => registry.position(timer).is_none(),
        })
    }
}

impl fmt::Debug for CtimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtimerService")
            .field("process", &self.process().map(|process| process.id()))
            .field("initialized", &self.is_initialized())
            .field("registered", &self.registered())
            .finish()
    }
}
