use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::pool::EventHandle;

/// Entry in a process's inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mail {
    Event(EventHandle),
    /// Unblocks the execution context of a process that has exited.
    Shutdown,
}

/// FIFO of pending deliveries for one process.
#[derive(Default)]
pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<Mail>>,
    ready: Condvar,
}

impl Mailbox {
    pub(crate) fn push(&self, mail: Mail) {
        self.queue.lock().push_back(mail);
        self.ready.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<Mail> {
        self.queue.lock().pop_front()
    }

    /// Blocks until mail arrives.
    pub(crate) fn wait(&self) -> Mail {
        let mut queue = self.queue.lock();
        loop {
            if let Some(mail) = queue.pop_front() {
                return mail;
            }
            self.ready.wait(&mut queue);
        }
    }

    /// Removes every queued event, leaving shutdown markers in place.
    pub(crate) fn drain_events(&self) -> Vec<EventHandle> {
        let mut queue = self.queue.lock();
        let mut drained = Vec::new();
        queue.retain(|mail| match mail {
            Mail::Event(handle) => {
                drained.push(*handle);
                false
            }
            Mail::Shutdown => true,
        });
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn has_events(&self) -> bool {
        self.queue
            .lock()
            .iter()
            .any(|mail| matches!(mail, Mail::Event(_)))
    }
}
