//! Execution-context primitives.
//!
//! A [`Port`] decides where a process's steps run. [`InlinePort`] runs
//! everything on the caller's thread and leaves queued events for
//! [`Kernel::run_until_idle`](crate::Kernel::run_until_idle); the POSIX port
//! gives each process its own OS thread running [`engine::run`](crate::engine::run).

use core::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::event::{Event, EventKind, Payload};
use crate::kernel::Kernel;
use crate::process::ProcessRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

impl ContextId {
    /// Shared by every process started on an [`InlinePort`].
    pub const INLINE: Self = Self(0);
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("failed to create execution context for `{name}`: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub trait Port: Send + Sync + 'static {
    /// Creates an execution context for a freshly registered process.
    ///
    /// The context must deliver INIT carrying `data` before anything queued.
    fn create(&self, kernel: &Arc<Kernel>, process: &ProcessRef, data: Payload) -> Result<ContextId, PortError>;

    fn name(&self) -> &'static str;
}

/// Single-threaded port used for deterministic runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePort;

impl Port for InlinePort {
    fn create(&self, kernel: &Arc<Kernel>, process: &ProcessRef, data: Payload) -> Result<ContextId, PortError> {
        kernel.deliver(process, &Event::new(EventKind::INIT, data));
        Ok(ContextId::INLINE)
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}
