use std::sync::{Arc, Mutex};

use pt::{from_fn, Event, EventKind, Kernel, KernelBuilder, KernelConfig, Payload, Process, ProcessRef, Step, TimerId};

use crate::{EtimerService, ManualClock, Tick};


#[derive(Clone, Default)]
pub(crate) struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    pub(crate) fn record(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    /// Timer ids of every TIMER event received so far.
    pub(crate) fn timers(&self) -> Vec<TimerId> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.kind == EventKind::TIMER)
            .filter_map(|event| event.payload.timer())
            .collect()
    }
}

pub(crate) struct Rig {
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) etimers: Arc<EtimerService>,
}

impl Rig {
    pub(crate) fn new(start: Tick) -> Self {
        Self::with_config(start, KernelConfig::default())
    }

    pub(crate) fn with_config(start: Tick, config: KernelConfig) -> Self {
        Self::with_builder(start, Kernel::with_config(config))
    }

    pub(crate) fn with_builder(start: Tick, builder: KernelBuilder) -> Self {
        let kernel = builder.build();
        let clock = Arc::new(ManualClock::new(start));
        let etimers = EtimerService::start(&kernel, clock.clone()).unwrap();
        kernel.run_until_idle();
        Self {
            kernel,
            clock,
            etimers,
        }
    }

    /// Starts a process that records every event it receives.
    pub(crate) fn owner(&self, name: &'static str) -> (ProcessRef, Journal) {
        let journal = Journal::default();
        let log = journal.clone();
        let process = Process::new(
            name,
            from_fn(move |_cx, event| {
                log.record(event);
                Step::Yield(())
            }),
        );
        self.kernel.start(&process, Payload::None).unwrap();
        (process, journal)
    }

    /// Moves time forward and lets the tick hook and every queue run.
    pub(crate) fn advance(&self, ticks: u32) {
        self.clock.advance(ticks);
        self.etimers.on_tick();
        self.kernel.run_until_idle();
    }
}
