use std::sync::{Arc, Mutex};

use crate::event::{Event, EventKind};
use crate::protothread::{from_fn, Routine, Step};

mod exit;

/// Shared log of the events a test process received.
#[derive(Clone, Default)]
pub(crate) struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    pub(crate) fn record(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    pub(crate) fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|event| event.kind).collect()
    }

    pub(crate) fn words(&self) -> Vec<usize> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| event.payload.word())
            .collect()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

/// Routine that records everything and never finishes on its own.
pub(crate) fn recorder(journal: &Journal) -> impl Routine {
    let journal = journal.clone();
    from_fn(move |_cx, event| {
        journal.record(event);
        Step::Yield(())
    })
}
