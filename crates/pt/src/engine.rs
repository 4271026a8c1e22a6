//! Execution-context loop.
//!
//! Each process's execution context delivers INIT, then repeatedly takes the
//! next entry from the process's mailbox, reads the event out of the pool,
//! steps the routine and returns the slot. The loop ends when the exit
//! sequence leaves a shutdown marker behind.

use std::sync::Arc;

use log::{debug, warn};

use crate::event::{Event, EventKind, Payload};
use crate::kernel::Kernel;
use crate::mailbox::Mail;
use crate::pool::EventHandle;
use crate::process::ProcessRef;

/// Body of a dedicated execution context. Returns once the process has exited.
pub fn run(kernel: Arc<Kernel>, process: ProcessRef, data: Payload) {
    debug!("execution context for `{}` running", process.name());
    kernel.deliver(&process, &Event::new(EventKind::INIT, data));

    loop {
        match process.mailbox().wait() {
            Mail::Shutdown => break,
            Mail::Event(handle) => dispatch(&kernel, &process, handle),
        }
    }
    debug!("execution context for `{}` finished", process.name());
}

/// Delivers the next queued event of `process`, if any, without blocking.
pub fn dispatch_next(kernel: &Arc<Kernel>, process: &ProcessRef) -> bool {
    match process.mailbox().try_pop() {
        Some(Mail::Event(handle)) => {
            dispatch(kernel, process, handle);
            true
        }
        Some(Mail::Shutdown) | None => false,
    }
}

fn dispatch(kernel: &Arc<Kernel>, process: &ProcessRef, handle: EventHandle) {
    let event = match kernel.pool().read(handle) {
        Ok(event) => event,
        Err(err) => {
            warn!("`{}` mailbox: {err}", process.name());
            return;
        }
    };

    if event.kind == EventKind::POLL {
        process.clear_poll();
    }
    kernel.deliver(process, &event);

    if let Err(err) = kernel.pool().release(handle) {
        warn!("`{}` after {}: {err}", process.name(), event.kind);
    }
}
