//! Process registry, dispatcher and exit sequence.

use core::cell::RefCell;
use core::fmt;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use critical_section::Mutex as CsMutex;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::engine;
use crate::event::{Event, EventKind, Payload};
use crate::mailbox::Mail;
use crate::pool::{EventPool, PoolError, DEFAULT_MAX_EVENTS};
use crate::port::{InlinePort, Port, PortError};
use crate::process::{ProcessId, ProcessRef, ProcessState};
use crate::protothread::PtState;
use crate::trace::{records, TraceHook};

/// Configuration for the kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    /// Capacity of the event pool: events in flight system-wide.
    pub max_events: usize,
    /// Capacity of the process registry.
    pub max_processes: usize,
    pub idle_callback: Option<fn()>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "pt",
            max_events: DEFAULT_MAX_EVENTS,
            max_processes: 32,
            idle_callback: None,
        }
    }
}

impl KernelConfig {
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the event pool capacity.
    pub fn max_events(mut self, max: usize) -> Self {
        self.config.max_events = max;
        self
    }

    pub fn max_processes(mut self, max: usize) -> Self {
        self.config.max_processes = max;
        self
    }

    /// Called by [`Kernel::run_until_idle`] once every queue is drained.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }
}

pub struct KernelBuilder {
    config: KernelConfig,
    port: Option<Box<dyn Port>>,
    trace: Option<TraceHook>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            port: None,
            trace: None,
        }
    }

    /// Selects the execution-context port. Defaults to [`InlinePort`].
    pub fn port<P: Port>(mut self, port: P) -> Self {
        self.port = Some(Box::new(port));
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn build(self) -> Arc<Kernel> {
        let port = self.port.unwrap_or_else(|| Box::new(InlinePort));
        Arc::new(Kernel::new(self.config, port, self.trace))
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("process {0} is already registered")]
    AlreadyStarted(ProcessId),
    #[error("process {0} has already run; build a new descriptor to run it again")]
    Finished(ProcessId),
    #[error("process registry full ({capacity} processes)")]
    RegistryFull { capacity: usize },
    #[error("no event kinds left to allocate")]
    EventKindsExhausted,
    #[error(transparent)]
    Port(#[from] PortError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PostError {
    #[error("process {0} is not running")]
    NotRunning(ProcessId),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl PostError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Pool(PoolError::Exhausted { .. }))
    }
}

thread_local! {
    /// Processes whose step or callback context is executing on this thread,
    /// innermost last.
    static ACTIVE: RefCell<Vec<ProcessRef>> = const { RefCell::new(Vec::new()) };
}

struct ActiveGuard;

impl ActiveGuard {
    fn enter(process: &ProcessRef) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(Arc::clone(process)));
        Self
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

fn active_here(id: ProcessId) -> bool {
    ACTIVE.with(|active| active.borrow().iter().any(|process| process.id() == id))
}

pub struct Kernel {
    config: KernelConfig,
    pool: EventPool,
    registry: CsMutex<RefCell<Vec<ProcessRef>>>,
    next_kind: AtomicU16,
    cursor: AtomicUsize,
    /// Paired with `step_done` to park deliveries into a process that is
    /// mid-step on another thread.
    step_gate: Mutex<()>,
    step_done: Condvar,
    port: Box<dyn Port>,
    trace: Option<TraceHook>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    fn new(config: KernelConfig, port: Box<dyn Port>, trace: Option<TraceHook>) -> Self {
        let pool = EventPool::new(config.max_events);
        Self {
            config,
            pool,
            registry: CsMutex::new(RefCell::new(Vec::new())),
            next_kind: AtomicU16::new(u16::from(EventKind::USER.raw())),
            cursor: AtomicUsize::new(0),
            step_gate: Mutex::new(()),
            step_done: Condvar::new(),
            port,
            trace,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn pool(&self) -> &EventPool {
        &self.pool
    }

    pub fn port_name(&self) -> &'static str {
        self.port.name()
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.trace.clone()
    }

    /// Forwards a record to the trace hook, if one is installed.
    pub fn emit_trace(&self, record: u8, payload: &[u8]) {
        if let Some(trace) = &self.trace {
            let _ = trace(record, payload, true);
        }
    }

    /// Hands out a fresh event kind. Kinds are never reused.
    pub fn alloc_event_kind(&self) -> Result<EventKind, KernelError> {
        self.next_kind
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next <= u16::from(u8::MAX)).then_some(next + 1)
            })
            .map(|kind| EventKind(kind as u8))
            .map_err(|_| KernelError::EventKindsExhausted)
    }

    /// The process whose step, or whose callback context, is executing on the
    /// calling thread.
    pub fn current() -> Option<ProcessRef> {
        ACTIVE.with(|active| active.borrow().last().cloned())
    }

    /// Snapshot of the registered processes in registration order.
    pub fn processes(&self) -> Vec<ProcessRef> {
        critical_section::with(|cs| self.registry.borrow_ref(cs).clone())
    }

    pub fn lookup(&self, id: ProcessId) -> Option<ProcessRef> {
        critical_section::with(|cs| {
            self.registry
                .borrow_ref(cs)
                .iter()
                .find(|process| process.id() == id)
                .cloned()
        })
    }

    pub fn is_registered(&self, process: &ProcessRef) -> bool {
        critical_section::with(|cs| {
            self.registry
                .borrow_ref(cs)
                .iter()
                .any(|registered| Arc::ptr_eq(registered, process))
        })
    }
}

impl Kernel {
    /// Registers `process`, marks it running and creates its execution
    /// context, which delivers INIT with `data` before anything else.
    pub fn start(self: &Arc<Self>, process: &ProcessRef, data: Payload) -> Result<(), KernelError> {
        if self.is_registered(process) {
            return Err(KernelError::AlreadyStarted(process.id()));
        }
        if process.was_started() {
            return Err(KernelError::Finished(process.id()));
        }

        process.routine().lock().rewind();

        critical_section::with(|cs| {
            let mut registry = self.registry.borrow_ref_mut(cs);
            if registry.len() >= self.config.max_processes {
                return Err(KernelError::RegistryFull {
                    capacity: self.config.max_processes,
                });
            }
            if !process.mark_started() {
                return Err(KernelError::AlreadyStarted(process.id()));
            }
            process.set_state_in(cs, ProcessState::Running);
            registry.push(Arc::clone(process));
            Ok(())
        })?;

        debug!(
            "starting process {} `{}` on {} port",
            process.id(),
            process.name(),
            self.port.name()
        );
        self.emit_trace(records::PT_START, &process.id().raw().to_le_bytes());

        match self.port.create(self, process, data) {
            Ok(context) => {
                process.set_context(context);
                Ok(())
            }
            Err(err) => {
                critical_section::with(|cs| {
                    process.set_state_in(cs, ProcessState::None);
                    self.registry
                        .borrow_ref_mut(cs)
                        .retain(|registered| !Arc::ptr_eq(registered, process));
                });
                Err(err.into())
            }
        }
    }

    /// Queues an event for asynchronous delivery on the target's own
    /// execution context.
    pub fn post(&self, process: &ProcessRef, kind: EventKind, payload: Payload) -> Result<(), PostError> {
        let posted = critical_section::with(|cs| {
            if process.state_in(cs) == ProcessState::None {
                return Err(PostError::NotRunning(process.id()));
            }
            let handle = self.pool.allocate(kind, payload)?;
            process.mailbox().push(Mail::Event(handle));
            Ok(())
        });

        let mut note = [0u8; 3];
        note[..2].copy_from_slice(&process.id().raw().to_le_bytes());
        note[2] = kind.raw();

        match &posted {
            Ok(()) => {
                trace!("posted {kind} to {} `{}`", process.id(), process.name());
                self.emit_trace(records::PT_POST, &note);
            }
            Err(err @ PostError::Pool(_)) => {
                warn!("cannot post {kind} to `{}`: {err}", process.name());
                self.emit_trace(records::PT_POST_FAIL, &note);
            }
            Err(err) => {
                debug!("dropping {kind} for `{}`: {err}", process.name());
                self.emit_trace(records::PT_POST_FAIL, &note);
            }
        }
        posted
    }

    /// Requests a POLL for `process`. At most one POLL is queued per process.
    pub fn poll(&self, process: &ProcessRef) -> Result<(), PostError> {
        if process.request_poll() {
            return Ok(());
        }
        self.post(process, EventKind::POLL, Payload::None)
            .map_err(|err| {
                process.clear_poll();
                err
            })
    }

    /// Delivers an event in the caller's context, bypassing the queue.
    ///
    /// # Panics
    ///
    /// Panics if the target finishes while handling the event, including
    /// when `kind` is EXIT; use [`exit`](Self::exit) to stop a process.
    pub fn post_sync(self: &Arc<Self>, process: &ProcessRef, kind: EventKind, payload: Payload) -> Option<PtState> {
        let state = self.deliver(process, &Event::new(kind, payload));
        let terminated = state.is_some_and(PtState::is_terminal) || (state.is_some() && !process.is_running());
        assert!(!terminated, "synchronous {kind} terminated process `{}`", process.name());
        state
    }

    /// Runs one step of `process` with `event`.
    ///
    /// Returns `None` without stepping when the process is not running, or
    /// when it is already mid-step further up this thread's call chain. A
    /// process mid-step on another thread is waited for.
    pub fn deliver(self: &Arc<Self>, process: &ProcessRef, event: &Event) -> Option<PtState> {
        if !self.claim(process) {
            return None;
        }

        let state = {
            let _active = ActiveGuard::enter(process);
            let mut routine = process.routine().lock();
            let mut cx = Context::new(self, process);
            routine.step(&mut cx, event)
        };
        trace!("`{}` handled {}: {state:?}", process.name(), event.kind);

        if state.is_terminal() || event.kind == EventKind::EXIT {
            self.exit_sequence(process, true);
        } else {
            critical_section::with(|cs| {
                if process.state_in(cs) == ProcessState::Called {
                    process.set_state_in(cs, ProcessState::Running);
                }
            });
            self.wake_claimants();
        }
        Some(state)
    }

    /// Removes `process` from the system.
    ///
    /// Unless the caller is `process` itself, its routine receives one final
    /// EXIT first.
    pub fn exit(self: &Arc<Self>, process: &ProcessRef) {
        let self_initiated = Self::current().is_some_and(|current| Arc::ptr_eq(&current, process));
        self.exit_sequence(process, self_initiated);
    }

    /// Exits every registered process, most recently started first.
    pub fn shutdown(self: &Arc<Self>) {
        for process in self.processes().iter().rev() {
            self.exit(process);
        }
    }

    /// Runs `f` in the logical context of `process`: the process becomes
    /// [`current`](Self::current) for the duration of the call.
    pub fn with_context<R>(self: &Arc<Self>, process: &ProcessRef, f: impl FnOnce(&mut Context<'_>) -> R) -> R {
        let _active = ActiveGuard::enter(process);
        let mut cx = Context::new(self, process);
        f(&mut cx)
    }

    /// Delivers one queued event to some running process.
    ///
    /// Only meaningful with [`InlinePort`]; threaded ports drain their own
    /// queues.
    pub fn dispatch_once(self: &Arc<Self>) -> bool {
        let processes = self.processes();
        if processes.is_empty() {
            return false;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % processes.len();
        (0..processes.len())
            .map(|offset| &processes[(start + offset) % processes.len()])
            .any(|process| process.state() == ProcessState::Running && engine::dispatch_next(self, process))
    }

    /// Drains every queue, then invokes the idle callback.
    pub fn run_until_idle(self: &Arc<Self>) {
        while self.dispatch_once() {}
        if let Some(idle) = self.config.idle_callback {
            idle();
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.processes()
            .iter()
            .any(|process| process.mailbox().has_events())
    }
}

impl Kernel {
    /// Moves a running process to `Called`.
    fn claim(&self, process: &ProcessRef) -> bool {
        let mut gate = self.step_gate.lock();
        loop {
            let observed = critical_section::with(|cs| {
                let state = process.state_in(cs);
                if state == ProcessState::Running {
                    process.set_state_in(cs, ProcessState::Called);
                }
                state
            });

            match observed {
                ProcessState::Running => return true,
                ProcessState::None => return false,
                ProcessState::Called if active_here(process.id()) => {
                    debug!("ignoring re-entrant delivery into `{}`", process.name());
                    return false;
                }
                ProcessState::Called => self.step_done.wait(&mut gate),
            }
        }
    }

    /// Wakes deliveries parked in [`claim`](Self::claim) after a process left
    /// `Called`.
    fn wake_claimants(&self) {
        let _gate = self.step_gate.lock();
        self.step_done.notify_all();
    }

    fn exit_sequence(self: &Arc<Self>, process: &ProcessRef, self_initiated: bool) {
        let was_live = critical_section::with(|cs| {
            let live = process.state_in(cs) != ProcessState::None;
            process.set_state_in(cs, ProcessState::None);
            live
        });
        if !was_live {
            return;
        }
        self.wake_claimants();
        debug!("process {} `{}` exiting", process.id(), process.name());

        // Observers still see the departing process registered.
        let departed = Payload::Process(process.id());
        for other in self.processes() {
            if !Arc::ptr_eq(&other, process) {
                self.deliver(&other, &Event::new(EventKind::EXITED, departed.clone()));
            }
        }

        if !self_initiated {
            self.final_exit_step(process);
        }

        for handle in process.mailbox().drain_events() {
            if let Err(err) = self.pool.release(handle) {
                warn!("`{}` exit: {err}", process.name());
            }
        }
        process.mailbox().push(Mail::Shutdown);

        critical_section::with(|cs| {
            self.registry
                .borrow_ref_mut(cs)
                .retain(|registered| !Arc::ptr_eq(registered, process));
        });
        self.emit_trace(records::PT_EXIT, &process.id().raw().to_le_bytes());
    }

    fn final_exit_step(self: &Arc<Self>, process: &ProcessRef) {
        if active_here(process.id()) {
            warn!("`{}` is executing on this thread; final EXIT skipped", process.name());
            return;
        }
        let Some(mut routine) = process.routine().try_lock() else {
            warn!("`{}` is busy on another context; final EXIT skipped", process.name());
            return;
        };

        let _active = ActiveGuard::enter(process);
        let mut cx = Context::new(self, process);
        routine.step(&mut cx, &Event::signal(EventKind::EXIT));
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("port", &self.port.name())
            .field("pool", &self.pool)
            .field("processes", &self.processes().len())
            .finish()
    }
}

/// Execution context handed to a routine for one step.
pub struct Context<'a> {
    kernel: &'a Arc<Kernel>,
    process: &'a ProcessRef,
}

impl<'a> Context<'a> {
    fn new(kernel: &'a Arc<Kernel>, process: &'a ProcessRef) -> Self {
        Self { kernel, process }
    }

    pub fn kernel(&self) -> &'a Arc<Kernel> {
        self.kernel
    }

    /// The process this step runs for.
    pub fn process(&self) -> &'a ProcessRef {
        self.process
    }

    pub fn id(&self) -> ProcessId {
        self.process.id()
    }

    pub fn post(&self, to: &ProcessRef, kind: EventKind, payload: Payload) -> Result<(), PostError> {
        self.kernel.post(to, kind, payload)
    }

    pub fn post_sync(&self, to: &ProcessRef, kind: EventKind, payload: Payload) -> Option<PtState> {
        self.kernel.post_sync(to, kind, payload)
    }

    pub fn poll(&self, to: &ProcessRef) -> Result<(), PostError> {
        self.kernel.poll(to)
    }

    /// Exits `target`; exiting the current process from its own step is
    /// self-initiated and skips the final EXIT delivery.
    pub fn exit(&self, target: &ProcessRef) {
        self.kernel.exit(target)
    }
}
