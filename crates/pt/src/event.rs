//! Event kinds, payloads and the event record.

use core::any::Any;
use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::process::ProcessId;

/// Small tag identifying what an event means to its receiver.
///
/// Kinds below [`EventKind::USER`] are reserved by the kernel and the timer
/// services. Application kinds come from
/// [`Kernel::alloc_event_kind`](crate::Kernel::alloc_event_kind).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKind(pub u8);

impl EventKind {
    pub const NONE: Self = Self(0);
    /// First event a process receives, carrying its start payload.
    pub const INIT: Self = Self(1);
    /// Coalesced wake-up request.
    pub const POLL: Self = Self(2);
    /// Asks the receiver to finish; the process is removed afterwards.
    pub const EXIT: Self = Self(3);
    pub const SERVICE_REMOVED: Self = Self(4);
    pub const CONTINUE: Self = Self(5);
    pub const MSG: Self = Self(6);
    /// Another process left the registry; payload is its [`ProcessId`].
    pub const EXITED: Self = Self(7);
    /// An elapsed timer expired; payload is its [`TimerId`].
    pub const TIMER: Self = Self(8);
    pub const COM: Self = Self(9);
    /// First kind available to applications.
    pub const USER: Self = Self(10);

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_reserved(self) -> bool {
        self.0 < Self::USER.0
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::NONE => "NONE",
            Self::INIT => "INIT",
            Self::POLL => "POLL",
            Self::EXIT => "EXIT",
            Self::SERVICE_REMOVED => "SERVICE_REMOVED",
            Self::CONTINUE => "CONTINUE",
            Self::MSG => "MSG",
            Self::EXITED => "EXITED",
            Self::TIMER => "TIMER",
            Self::COM => "COM",
            _ => return None,
        };
        Some(name)
    }
}

impl From<u8> for EventKind {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "EV({:#04x})", self.0),
        }
    }
}

/// Identity of an elapsed timer, carried as the payload of TIMER events.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u32);

impl TimerId {
    /// Hands out a fresh identity; identities are never reused.
    pub fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

pub type DynPayload = Arc<dyn Any + Send + Sync>;

/// Data attached to an event. The kernel never looks inside it.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    None,
    Process(ProcessId),
    Timer(TimerId),
    Word(usize),
    Shared(DynPayload),
}

impl Payload {
    pub fn shared<T: Any + Send + Sync>(value: T) -> Self {
        Self::Shared(Arc::new(value))
    }

    pub fn process(&self) -> Option<ProcessId> {
        match self {
            Self::Process(id) => Some(*id),
            _ => None,
        }
    }

    pub fn timer(&self) -> Option<TimerId> {
        match self {
            Self::Timer(id) => Some(*id),
            _ => None,
        }
    }

    pub fn word(&self) -> Option<usize> {
        match self {
            Self::Word(word) => Some(*word),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Shared(data) => data.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Process(id) => f.debug_tuple("Process").field(id).finish(),
            Self::Timer(id) => f.debug_tuple("Timer").field(id).finish(),
            Self::Word(word) => f.debug_tuple("Word").field(word).finish(),
            Self::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Payload,
}

impl Event {
    pub fn new(kind: EventKind, payload: Payload) -> Self {
        Self { kind, payload }
    }

    /// An event with no payload.
    pub fn signal(kind: EventKind) -> Self {
        Self::new(kind, Payload::None)
    }
}
