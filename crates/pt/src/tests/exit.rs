use std::sync::{Arc, Mutex};

use super::{recorder, Journal};
use crate::event::{EventKind, Payload};
use crate::kernel::Kernel;
use crate::process::{Process, ProcessState};
use crate::protothread::{from_fn, Step};

#[test]
fn exited_notification_reaches_every_other_process_before_unlinking() {
    let kernel = Kernel::builder().build();
    let still_registered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&still_registered);
    let observer = Process::new(
        "observer",
        from_fn(move |cx, event| {
            if event.kind == EventKind::EXITED {
                let departed = event.payload.process().expect("EXITED carries a process id");
                sink.lock().unwrap().push(cx.kernel().lookup(departed).is_some());
            }
            Step::Yield(())
        }),
    );
    let bystander_log = Journal::default();
    let bystander = Process::new("bystander", recorder(&bystander_log));
    let leaving = Process::new(
        "leaving",
        from_fn(|_cx, event| {
            if event.kind == EventKind::MSG {
                Step::End
            } else {
                Step::Yield(())
            }
        }),
    );

    kernel.start(&observer, Payload::None).unwrap();
    kernel.start(&bystander, Payload::None).unwrap();
    kernel.start(&leaving, Payload::None).unwrap();
    kernel.post(&leaving, EventKind::MSG, Payload::None).unwrap();
    kernel.run_until_idle();

    assert_eq!(still_registered.lock().unwrap().as_slice(), &[true]);
    let exited: Vec<_> = bystander_log
        .events()
        .into_iter()
        .filter(|event| event.kind == EventKind::EXITED)
        .map(|event| event.payload.process())
        .collect();
    assert_eq!(exited, vec![Some(leaving.id())]);
    assert_eq!(leaving.state(), ProcessState::None);
    assert!(!kernel.is_registered(&leaving));
}

#[test]
fn exiting_another_process_delivers_final_exit() {
    let journal = Journal::default();
    let kernel = Kernel::builder().build();
    let target = Process::new("target", recorder(&journal));
    kernel.start(&target, Payload::None).unwrap();

    kernel.exit(&target);

    assert_eq!(journal.kinds(), vec![EventKind::INIT, EventKind::EXIT]);
    assert!(!target.is_running());
}

#[test]
fn self_initiated_exit_skips_final_exit() {
    let journal = Journal::default();
    let log = journal.clone();
    let kernel = Kernel::builder().build();
    let quitter = Process::new(
        "quitter",
        from_fn(move |_cx, event| {
            log.record(event);
            if event.kind == EventKind::CONTINUE {
                Step::Exit
            } else {
                Step::Yield(())
            }
        }),
    );
    kernel.start(&quitter, Payload::None).unwrap();

    kernel.post(&quitter, EventKind::CONTINUE, Payload::None).unwrap();
    kernel.run_until_idle();

    assert_eq!(journal.kinds(), vec![EventKind::INIT, EventKind::CONTINUE]);
    assert!(!kernel.is_registered(&quitter));
}

#[test]
fn process_can_exit_itself_through_its_context() {
    let journal = Journal::default();
    let log = journal.clone();
    let kernel = Kernel::builder().build();
    let process = Process::new(
        "self-exit",
        from_fn(move |cx, event| {
            log.record(event);
            if event.kind == EventKind::MSG {
                cx.exit(cx.process());
            }
            Step::Yield(())
        }),
    );
    kernel.start(&process, Payload::None).unwrap();
    kernel.post(&process, EventKind::MSG, Payload::None).unwrap();
    kernel.run_until_idle();

    assert_eq!(journal.kinds(), vec![EventKind::INIT, EventKind::MSG]);
    assert_eq!(process.state(), ProcessState::None);
}

#[test]
fn posted_exit_event_removes_the_process() {
    let journal = Journal::default();
    let kernel = Kernel::builder().build();
    let process = Process::new("exit-event", recorder(&journal));
    kernel.start(&process, Payload::None).unwrap();

    kernel.post(&process, EventKind::EXIT, Payload::None).unwrap();
    kernel.run_until_idle();

    assert_eq!(journal.kinds(), vec![EventKind::INIT, EventKind::EXIT]);
    assert!(!kernel.is_registered(&process));
}

#[test]
fn queued_events_are_returned_to_the_pool_on_exit() {
    let journal = Journal::default();
    let kernel = Kernel::builder().build();
    let process = Process::new("backlog", recorder(&journal));
    kernel.start(&process, Payload::None).unwrap();

    kernel.post(&process, EventKind::MSG, Payload::Word(1)).unwrap();
    kernel.post(&process, EventKind::MSG, Payload::Word(2)).unwrap();
    assert_eq!(kernel.pool().in_use(), 2);

    kernel.exit(&process);

    assert_eq!(kernel.pool().in_use(), 0);
    assert!(journal.words().is_empty());
    assert!(kernel.post(&process, EventKind::MSG, Payload::None).is_err());
}

#[test]
fn repeated_exit_is_a_no_op() {
    let journal = Journal::default();
    let kernel = Kernel::builder().build();
    let process = Process::new("twice", recorder(&journal));
    kernel.start(&process, Payload::None).unwrap();

    kernel.exit(&process);
    kernel.exit(&process);

    assert_eq!(journal.kinds(), vec![EventKind::INIT, EventKind::EXIT]);
}

#[test]
fn shutdown_exits_everything() {
    let kernel = Kernel::builder().build();
    let first = Process::new("first", recorder(&Journal::default()));
    let second = Process::new("second", recorder(&Journal::default()));
    kernel.start(&first, Payload::None).unwrap();
    kernel.start(&second, Payload::None).unwrap();

    kernel.shutdown();

    assert!(kernel.processes().is_empty());
    assert!(!first.is_running());
    assert!(!second.is_running());
}
