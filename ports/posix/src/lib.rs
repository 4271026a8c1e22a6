//! POSIX hosting for the protothread kernel.
//!
//! [`ThreadPort`] gives each process its own OS thread, [`SystemClock`]
//! counts monotonic ticks and [`Ticker`] drives the elapsed-timer service
//! from a periodic thread. [`Runtime`] wires all of them together with both
//! timer services.

pub mod clock;
pub mod thread;
pub mod time;

use core::fmt;
use std::io;
use std::sync::Arc;

use ctimer::CtimerService;
use etimer::{Clock, EtimerService};
use log::{debug, info};
use parking_lot::Mutex;
use pt::{Kernel, KernelBuilder, KernelConfig, KernelError, Payload, ProcessRef, TraceHook};
use thiserror::Error;

pub use crate::clock::SystemClock;
pub use crate::thread::ThreadPort;
pub use crate::time::{tick_period, Ticker, DEFAULT_TICKS_PER_SEC};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("failed to start tick thread: {0}")]
    Ticker(#[source] io::Error),
}

pub struct RuntimeConfig {
    pub kernel: KernelConfig,
    pub tick_rate_hz: u32,
    /// Start a [`Ticker`] feeding [`EtimerService::on_tick`].
    pub ticker: bool,
    pub trace_hook: Option<TraceHook>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            tick_rate_hz: DEFAULT_TICKS_PER_SEC,
            ticker: true,
            trace_hook: None,
        }
    }
}

impl RuntimeConfig {
    pub fn kernel(mut self, config: KernelConfig) -> Self {
        self.kernel = config;
        self
    }

    pub fn tick_rate(mut self, rate_hz: u32) -> Self {
        self.tick_rate_hz = rate_hz;
        self
    }

    /// Leaves ticking to the caller, through [`Runtime::tick`].
    pub fn without_ticker(mut self) -> Self {
        self.ticker = false;
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace_hook = Some(hook);
        self
    }
}

/// A threaded kernel with both timer services running.
pub struct Runtime {
    kernel: Arc<Kernel>,
    port: ThreadPort,
    clock: Arc<SystemClock>,
    etimers: Arc<EtimerService>,
    ctimers: Arc<CtimerService>,
    ticker: Mutex<Option<Ticker>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let port = ThreadPort::new();
        let mut builder = KernelBuilder::new(config.kernel).port(port.clone());
        if let Some(hook) = config.trace_hook {
            builder = builder.with_trace_hook(hook);
        }
        let kernel = builder.build();

        let clock = Arc::new(SystemClock::new(config.tick_rate_hz));
        let etimers = EtimerService::start(&kernel, clock.clone())?;
        let ctimers = CtimerService::new(&kernel);
        ctimers.start(&etimers)?;

        let ticker = if config.ticker {
            let service = Arc::clone(&etimers);
            let ticker = Ticker::start(config.tick_rate_hz, move || {
                service.on_tick();
            })
            .map_err(RuntimeError::Ticker)?;
            Some(ticker)
        } else {
            None
        };

        info!(
            "runtime `{}` up at {} Hz on {}",
            kernel.config().name,
            config.tick_rate_hz,
            kernel.port_name()
        );
        Ok(Self {
            kernel,
            port,
            clock,
            etimers,
            ctimers,
            ticker: Mutex::new(ticker),
        })
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn port(&self) -> &ThreadPort {
        &self.port
    }

    pub fn clock(&self) -> &Arc<SystemClock> {
        &self.clock
    }

    pub fn etimers(&self) -> &Arc<EtimerService> {
        &self.etimers
    }

    pub fn ctimers(&self) -> &Arc<CtimerService> {
        &self.ctimers
    }

    /// Starts `process` on its own thread.
    pub fn start(&self, process: &ProcessRef, data: Payload) -> Result<(), KernelError> {
        self.kernel.start(process, data)
    }

    /// Manual tick for runtimes built [`without_ticker`](RuntimeConfig::without_ticker).
    pub fn tick(&self) -> bool {
        self.etimers.on_tick()
    }

    /// Stops the ticker, exits every process and joins their threads.
    ///
    /// Must not be called from a process thread.
    pub fn shutdown(&self) {
        if let Some(mut ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
        self.kernel.shutdown();
        self.port.join_all();
        debug!("runtime `{}` shut down at {}", self.kernel.config().name, self.clock.now());
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("kernel", &self.kernel)
            .field("port", &self.port)
            .field("rate_hz", &self.clock.rate_hz())
            .finish()
    }
}
