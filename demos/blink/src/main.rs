//! Blinks a simulated LED twice a second from a periodic elapsed timer while
//! a callback timer logs a heartbeat every two seconds.
//!
//! Runs until Ctrl-C, or for the number of blinks given as the first
//! argument.

mod logger;

use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;

use ctimer::{Ctimer, CtimerService};
use etimer::Etimer;
use log::{error, info};
use pt::{Context, Event, EventKind, Payload, Process, Routine, Step};
use pt_posix::{Runtime, RuntimeConfig};

const TICK_RATE_HZ: u32 = 100;
const BLINK_TICKS: u32 = TICK_RATE_HZ / 2;
const HEARTBEAT_TICKS: u32 = TICK_RATE_HZ * 2;

#[derive(Debug, Default, Clone, Copy)]
enum Site {
    #[default]
    Arm,
    Blink,
}

struct Blinker {
    etimers: Arc<etimer::EtimerService>,
    timer: etimer::EtimerRef,
    lit: bool,
    blinks: u32,
    limit: Option<u32>,
    done: mpsc::Sender<()>,
}

impl Routine for Blinker {
    type Site = Site;

    fn resume(&mut self, site: Site, cx: &mut Context<'_>, event: &Event) -> Step<Site> {
        match site {
            Site::Arm => {
                self.etimers.set(&self.timer, BLINK_TICKS, cx.process());
                Step::Yield(Site::Blink)
            }
            Site::Blink => {
                pt::yield_until!(
                    Site::Blink,
                    event.kind == EventKind::TIMER && event.payload.timer() == Some(self.timer.id())
                );
                self.lit = !self.lit;
                self.blinks += 1;
                info!("LED {}", if self.lit { "on" } else { "off" });

                if self.limit.is_some_and(|limit| self.blinks >= limit) {
                    self.done.send(()).ok();
                    return Step::End;
                }
                self.etimers.reset(&self.timer, cx.process());
                Step::Yield(Site::Blink)
            }
        }
    }
}

fn heartbeat(ctimers: &Arc<CtimerService>, timer: &Arc<Ctimer>) {
    let service = Arc::downgrade(ctimers);
    let rearm = Arc::downgrade(timer);
    let mut beats = 0u32;
    ctimers.set_with_process(timer, HEARTBEAT_TICKS, None, move |cx| {
        beats += 1;
        info!("heartbeat {beats} from {}", cx.process().name());
        if let (Some(service), Some(timer)) = (service.upgrade(), rearm.upgrade()) {
            service.reset(&timer);
        }
    });
}

fn run(limit: Option<u32>) -> Result<(), pt_posix::RuntimeError> {
    let runtime = Runtime::new(RuntimeConfig::default().tick_rate(TICK_RATE_HZ))?;
    let (done, finished) = mpsc::channel();

    let interrupt = done.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        interrupt.send(()).ok();
    }) {
        error!("cannot install Ctrl-C handler: {err}");
    }

    let blinker = Process::new(
        "blinker",
        Blinker {
            etimers: Arc::clone(runtime.etimers()),
            timer: Etimer::new(),
            lit: false,
            blinks: 0,
            limit,
            done,
        },
    );
    runtime.start(&blinker, Payload::None)?;

    let beat = Ctimer::new();
    heartbeat(runtime.ctimers(), &beat);

    finished.recv().ok();
    info!("stopping at {}", runtime.etimers().now());
    runtime.ctimers().stop(&beat);
    runtime.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    logger::init();

    let limit = match std::env::args().nth(1).map(|arg| arg.parse::<u32>()) {
        None => None,
        Some(Ok(limit)) => Some(limit),
        Some(Err(err)) => {
            error!("blink count must be a number: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(limit) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
