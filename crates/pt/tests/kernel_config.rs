//! Tests for KernelConfig builder and functionality.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use pt::{from_fn, EventKind, Kernel, KernelConfig, Payload, Process, Step};

#[test]
fn kernel_config_builder() {
    let config = KernelConfig::builder()
        .name("TestKernel")
        .max_events(8)
        .max_processes(4)
        .build();

    assert_eq!(config.name, "TestKernel");
    assert_eq!(config.max_events, 8);
    assert_eq!(config.max_processes, 4);
    assert!(config.idle_callback.is_none());
}

#[test]
fn kernel_config_default() {
    let config = KernelConfig::default();

    assert_eq!(config.name, "pt");
    assert_eq!(config.max_events, 32);
    assert_eq!(config.max_processes, 32);
}

#[test]
fn kernel_with_custom_config() {
    let config = KernelConfig::builder().name("CustomKernel").max_events(3).build();

    let kernel = Kernel::with_config(config).build();

    assert_eq!(kernel.config().name, "CustomKernel");
    assert_eq!(kernel.pool().capacity(), 3);
    assert_eq!(kernel.port_name(), "inline");
}

static IDLE_CALLS: AtomicUsize = AtomicUsize::new(0);
static HANDLED: Lazy<Mutex<Vec<EventKind>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn on_idle() {
    IDLE_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn kernel_idle_callback_runs_after_queues_drain() {
    let config = KernelConfig::builder().idle_callback(on_idle).build();
    let kernel = Kernel::with_config(config).build();
    let process = Process::new(
        "worker",
        from_fn(|_cx, event| {
            HANDLED.lock().unwrap().push(event.kind);
            Step::Yield(())
        }),
    );
    kernel.start(&process, Payload::None).unwrap();
    kernel.post(&process, EventKind::MSG, Payload::None).unwrap();
    kernel.post(&process, EventKind::CONTINUE, Payload::None).unwrap();

    kernel.run_until_idle();

    assert_eq!(IDLE_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(
        HANDLED.lock().unwrap().as_slice(),
        &[EventKind::INIT, EventKind::MSG, EventKind::CONTINUE]
    );
}
