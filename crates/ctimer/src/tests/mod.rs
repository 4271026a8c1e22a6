use std::sync::{Arc, Mutex};

use etimer::{EtimerService, ManualClock, Tick};
use pt::{from_fn, Context, Event, EventKind, Kernel, Payload, Process, ProcessId, ProcessRef, Step};

use crate::CtimerService;

mod lifecycle;

pub(crate) struct Rig {
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) etimers: Arc<EtimerService>,
    pub(crate) ctimers: Arc<CtimerService>,
}

impl Rig {
    /// Kernel with both timer services running.
    pub(crate) fn new() -> Self {
        let rig = Self::unstarted();
        rig.ctimers.start(&rig.etimers).unwrap();
        rig.kernel.run_until_idle();
        rig
    }

    /// Elapsed-timer service running, callback-timer service not yet started.
    pub(crate) fn unstarted() -> Self {
        let kernel = Kernel::builder().build();
        let clock = Arc::new(ManualClock::new(Tick(0)));
        let etimers = EtimerService::start(&kernel, clock.clone()).unwrap();
        let ctimers = CtimerService::new(&kernel);
        kernel.run_until_idle();
        Self {
            kernel,
            clock,
            etimers,
            ctimers,
        }
    }

    /// Starts a process that records every event it receives.
    pub(crate) fn owner(&self, name: &'static str) -> (ProcessRef, Arc<Mutex<Vec<Event>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&journal);
        let process = Process::new(
            name,
            from_fn(move |_cx, event| {
                log.lock().unwrap().push(event.clone());
                Step::Yield(())
            }),
        );
        self.kernel.start(&process, Payload::None).unwrap();
        (process, journal)
    }

    pub(crate) fn advance(&self, ticks: u32) {
        self.clock.advance(ticks);
        self.etimers.on_tick();
        self.kernel.run_until_idle();
    }
}

/// Shared record of the processes each callback ran as.
#[derive(Clone, Default)]
pub(crate) struct Calls(Arc<Mutex<Vec<ProcessId>>>);

impl Calls {
    pub(crate) fn callback(&self) -> impl FnMut(&mut Context<'_>) + Send + 'static {
        let calls = self.clone();
        move |cx| calls.0.lock().unwrap().push(cx.id())
    }

    pub(crate) fn seen(&self) -> Vec<ProcessId> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

pub(crate) fn kinds(journal: &Arc<Mutex<Vec<Event>>>) -> Vec<EventKind> {
    journal.lock().unwrap().iter().map(|event| event.kind).collect()
}
