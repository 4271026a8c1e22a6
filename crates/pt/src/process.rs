//! Process descriptors and lifecycle state.

use core::cell::Cell;
use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use critical_section::{CriticalSection, Mutex as CsMutex};
use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::mailbox::Mailbox;
use crate::port::ContextId;
use crate::protothread::{Protothread, Resumable, Routine};

/// Stack size requested for a process's execution context unless overridden.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u16);

impl ProcessId {
    fn next() -> Self {
        static NEXT: AtomicU16 = AtomicU16::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Lifecycle of a process.
///
/// `Called` marks a process whose routine is executing a step; a second
/// delivery into it during that step would corrupt its saved site.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    #[default]
    None,
    Running,
    Called,
}

/// A resumable unit of application logic with its own event queue.
///
/// Built by the application and handed to
/// [`Kernel::start`](crate::Kernel::start). A descriptor runs once; build a
/// new one to run the routine again.
pub struct Process {
    id: ProcessId,
    name: &'static str,
    stack_size: usize,
    state: CsMutex<Cell<ProcessState>>,
    routine: Mutex<Box<dyn Resumable>>,
    mailbox: Mailbox,
    context: Mutex<Option<ContextId>>,
    started: AtomicBool,
    poll_pending: AtomicBool,
}

pub type ProcessRef = Arc<Process>;

impl Process {
    pub fn new<R: Routine>(name: &'static str, routine: R) -> ProcessRef {
        Self::with_stack_size(name, DEFAULT_STACK_SIZE, routine)
    }

    pub fn with_stack_size<R: Routine>(name: &'static str, stack_size: usize, routine: R) -> ProcessRef {
        Arc::new(Self {
            id: ProcessId::next(),
            name,
            stack_size,
            state: CsMutex::new(Cell::new(ProcessState::None)),
            routine: Mutex::new(Box::new(Protothread::new(routine))),
            mailbox: Mailbox::default(),
            context: Mutex::new(None),
            started: AtomicBool::new(false),
            poll_pending: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn state(&self) -> ProcessState {
        critical_section::with(|cs| self.state_in(cs))
    }

    /// True from start until the exit sequence begins.
    pub fn is_running(&self) -> bool {
        self.state() != ProcessState::None
    }

    /// Execution context created for this process by the kernel's port.
    pub fn context(&self) -> Option<ContextId> {
        *self.context.lock()
    }

    /// Number of queued, undelivered mailbox entries.
    pub fn queued(&self) -> usize {
        self.mailbox.len()
    }
}

impl Process {
    pub(crate) fn state_in(&self, cs: CriticalSection<'_>) -> ProcessState {
        self.state.borrow(cs).get()
    }

    pub(crate) fn set_state_in(&self, cs: CriticalSection<'_>, state: ProcessState) {
        self.state.borrow(cs).set(state);
    }

    pub(crate) fn routine(&self) -> &Mutex<Box<dyn Resumable>> {
        &self.routine
    }

    pub(crate) fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub(crate) fn set_context(&self, context: ContextId) {
        *self.context.lock() = Some(context);
    }

    pub(crate) fn was_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Returns false if the descriptor had already been claimed by a start.
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    /// Returns true if a POLL was already outstanding.
    pub(crate) fn request_poll(&self) -> bool {
        self.poll_pending.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_poll(&self) {
        self.poll_pending.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("context", &self.context())
            .field("queued", &self.queued())
            .finish()
    }
}
