//! # pt
//!
//! Cooperative process layer of a small real-time kernel. Application logic
//! is written as resumable routines ("protothreads") that suspend at explicit
//! sites and wake on events posted to their process.
//!
//! ## Module Overview
//! - [`event`]       – event kinds, payloads and the event record.
//! - [`pool`]        – bounded event pool with generation-checked handles.
//! - [`protothread`] – routines, suspension sites and step outcomes.
//! - [`process`]     – process descriptors and lifecycle state.
//! - [`kernel`]      – registry, dispatcher, exit sequence and configuration.
//! - [`engine`]      – the loop each execution context runs.
//! - [`port`]        – execution-context primitives; [`InlinePort`] runs
//!   everything on the calling thread.
//! - [`trace`]       – optional trace hook and record identifiers.
//!
//! Shared state (pool slots, registry links, lifecycle state) is guarded by
//! `critical-section` spans. Routines, timer callbacks and trace hooks never
//! run inside one.

pub mod engine;
pub mod event;
pub mod kernel;
mod mailbox;
pub mod pool;
pub mod port;
pub mod process;
pub mod protothread;
pub mod trace;

pub use event::{DynPayload, Event, EventKind, Payload, TimerId};
pub use kernel::{Context, Kernel, KernelBuilder, KernelConfig, KernelConfigBuilder, KernelError, PostError};
pub use pool::{EventHandle, EventPool, PoolError, PoolStats};
pub use port::{ContextId, InlinePort, Port, PortError};
pub use process::{Process, ProcessId, ProcessRef, ProcessState};
pub use protothread::{from_fn, FnRoutine, Protothread, PtState, Resumable, Routine, Step};
pub use trace::{TraceError, TraceHook, TraceResult};

#[cfg(test)]
mod tests;
