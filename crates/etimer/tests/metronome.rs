//! A periodic protothread driven by an elapsed timer across tick wraparound.

use std::sync::{Arc, Mutex};

use etimer::{Etimer, EtimerRef, EtimerService, ManualClock, Tick};
use pt::{Context, Event, EventKind, Kernel, Payload, Process, Routine, Step};

const PERIOD: u32 = 25;

#[derive(Debug, Default, Clone, Copy)]
enum Site {
    #[default]
    Arm,
    Beat,
}

struct Metronome {
    etimers: Arc<EtimerService>,
    timer: EtimerRef,
    beats: Arc<Mutex<Vec<Tick>>>,
    limit: usize,
}

impl Routine for Metronome {
    type Site = Site;

    fn resume(&mut self, site: Site, cx: &mut Context<'_>, event: &Event) -> Step<Site> {
        match site {
            Site::Arm => {
                self.etimers.set(&self.timer, PERIOD, cx.process());
                Step::Wait(Site::Beat)
            }
            Site::Beat => {
                pt::wait_until!(
                    Site::Beat,
                    event.kind == EventKind::TIMER && self.etimers.expired(&self.timer)
                );
                let count = {
                    let mut beats = self.beats.lock().unwrap();
                    beats.push(self.etimers.expiration_time(&self.timer));
                    beats.len()
                };
                if count == self.limit {
                    return Step::End;
                }
                self.etimers.reset(&self.timer, cx.process());
                Step::Wait(Site::Beat)
            }
        }
    }
}

#[test]
fn metronome_keeps_its_period_across_wraparound() {
    let origin = Tick(u32::MAX - 30);
    let kernel = Kernel::builder().build();
    let clock = Arc::new(ManualClock::new(origin));
    let etimers = EtimerService::start(&kernel, clock.clone()).unwrap();
    let beats = Arc::new(Mutex::new(Vec::new()));

    let metronome = Process::new(
        "metronome",
        Metronome {
            etimers: Arc::clone(&etimers),
            timer: Etimer::new(),
            beats: Arc::clone(&beats),
            limit: 4,
        },
    );
    kernel.start(&metronome, Payload::None).unwrap();
    kernel.run_until_idle();

    for _ in 0..30 {
        clock.advance(5);
        etimers.on_tick();
        kernel.run_until_idle();
    }

    let expected: Vec<Tick> = (1..=4).map(|beat| origin.wrapping_add(PERIOD * beat)).collect();
    assert_eq!(beats.lock().unwrap().as_slice(), expected.as_slice());
    assert!(!kernel.is_registered(&metronome));
    assert!(!etimers.pending());
}
