//! Thread-per-process execution contexts.

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};
use parking_lot::Mutex;
use pt::{engine, ContextId, Kernel, Payload, Port, PortError, ProcessRef};

/// Smallest stack handed to a process thread, whatever the descriptor asks for.
pub const MIN_STACK_SIZE: usize = 128 * 1024;

struct Inner {
    next_id: AtomicU32,
    threads: Mutex<Vec<(ContextId, JoinHandle<()>)>>,
}

/// Runs every process on its own named OS thread.
///
/// Clones share the same set of threads, so a runtime can keep one clone for
/// joining while the kernel owns another.
#[derive(Clone)]
pub struct ThreadPort {
    inner: Arc<Inner>,
}

impl ThreadPort {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU32::new(1),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Number of contexts not yet joined.
    pub fn live(&self) -> usize {
        self.inner.threads.lock().len()
    }

    /// Waits for the thread behind `context` to finish. Returns `false` if no
    /// such thread is tracked.
    ///
    /// The thread only finishes once its process has exited.
    pub fn join(&self, context: ContextId) -> bool {
        let handle = {
            let mut threads = self.inner.threads.lock();
            match threads.iter().position(|(id, _)| *id == context) {
                Some(index) => threads.remove(index).1,
                None => return false,
            }
        };
        Self::reap(context, handle);
        true
    }

    /// Waits for every tracked thread.
    pub fn join_all(&self) {
        let threads = core::mem::take(&mut *self.inner.threads.lock());
        for (context, handle) in threads {
            Self::reap(context, handle);
        }
    }

    fn reap(context: ContextId, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            error!("execution context {context} panicked");
        } else {
            debug!("execution context {context} joined");
        }
    }
}

impl Default for ThreadPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for ThreadPort {
    fn create(&self, kernel: &Arc<Kernel>, process: &ProcessRef, data: Payload) -> Result<ContextId, PortError> {
        let context = ContextId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let worker_kernel = Arc::clone(kernel);
        let worker = Arc::clone(process);

        let handle = thread::Builder::new()
            .name(format!("pt:{}", process.name()))
            .stack_size(process.stack_size().max(MIN_STACK_SIZE))
            .spawn(move || engine::run(worker_kernel, worker, data))
            .map_err(|source| {
                error!("cannot spawn thread for `{}`: {source}", process.name());
                PortError::Spawn {
                    name: process.name(),
                    source,
                }
            })?;

        self.inner.threads.lock().push((context, handle));
        debug!("`{}` running on {context}", process.name());
        Ok(context)
    }

    fn name(&self) -> &'static str {
        "posix-thread"
    }
}

impl fmt::Debug for ThreadPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPort").field("live", &self.live()).finish()
    }
}
