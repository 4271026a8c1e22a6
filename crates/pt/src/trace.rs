use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("trace sink rejected record {0}")]
    Rejected(u8),
    #[error("trace sink unavailable")]
    Unavailable,
}

pub type TraceResult = Result<(), TraceError>;

/// Receives `(record, payload, with_timestamp)` for every emitted record.
///
/// Hooks are never invoked from inside a critical section.
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

/// Record identifiers.
pub mod records {
    /// Process registered; payload: process id (LE u16).
    pub const PT_START: u8 = 60;
    /// Event queued; payload: target id (LE u16), kind.
    pub const PT_POST: u8 = 61;
    /// Post rejected; payload: target id (LE u16), kind.
    pub const PT_POST_FAIL: u8 = 62;
    /// Exit sequence ran; payload: process id (LE u16).
    pub const PT_EXIT: u8 = 63;

    /// Elapsed timer armed; payload: timer id (LE u32), interval (LE u32).
    pub const ETIMER_ARM: u8 = 70;
    /// TIMER event posted to the owner; payload: timer id, owner id.
    pub const ETIMER_POST: u8 = 71;
    /// Elapsed timer stopped; payload: timer id.
    pub const ETIMER_STOP: u8 = 72;
    /// Timers purged after an owner exited; payload: owner id, count (LE u16).
    pub const ETIMER_PURGE: u8 = 73;

    /// Callback timer fired; payload: timer id, owner id.
    pub const CTIMER_FIRE: u8 = 80;
}
