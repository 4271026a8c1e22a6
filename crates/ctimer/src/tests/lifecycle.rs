use etimer::Tick;

use super::{Calls, Rig};
use crate::{Ctimer, CtimerService};
use pt::KernelError;

#[test]
fn timers_set_before_start_count_from_service_init() {
    let rig = Rig::unstarted();
    let calls = Calls::default();
    let timer = Ctimer::new();

    rig.ctimers.set_with_process(&timer, 10, None, calls.callback());
    assert!(!rig.ctimers.is_initialized());
    assert!(!rig.ctimers.expired(&timer));
    assert_eq!(rig.etimers.outstanding(), 0);

    rig.clock.advance(100);
    rig.ctimers.start(&rig.etimers).unwrap();
    rig.kernel.run_until_idle();

    assert!(rig.ctimers.is_initialized());
    assert_eq!(timer.etimer().expiration_time(), Tick(110));

    rig.advance(9);
    assert_eq!(calls.count(), 0);
    rig.advance(1);
    assert_eq!(calls.count(), 1);
}

#[test]
fn unarmed_timer_reads_as_expired() {
    let rig = Rig::unstarted();
    assert!(rig.ctimers.expired(&Ctimer::new()));

    let rig = Rig::new();
    assert!(rig.ctimers.expired(&Ctimer::new()));
}

#[test]
fn stopped_timer_never_runs() {
    let rig = Rig::new();
    let (owner, _journal) = rig.owner("owner");
    let calls = Calls::default();
    let timer = Ctimer::new();

    rig.ctimers.set_with_process(&timer, 5, Some(&owner), calls.callback());
    rig.ctimers.stop(&timer);

    assert!(rig.ctimers.expired(&timer));
    assert_eq!(rig.ctimers.registered(), 0);
    assert_eq!(rig.etimers.outstanding(), 0);

    rig.advance(10);
    assert_eq!(calls.count(), 0);
}

#[test]
fn stopping_before_start_forgets_the_timer() {
    let rig = Rig::unstarted();
    let calls = Calls::default();
    let timer = Ctimer::new();

    rig.ctimers.set_with_process(&timer, 5, None, calls.callback());
    rig.ctimers.stop(&timer);
    rig.ctimers.start(&rig.etimers).unwrap();

    rig.advance(10);
    assert_eq!(calls.count(), 0);
    assert_eq!(rig.etimers.outstanding(), 0);
}

#[test]
fn exiting_owner_cancels_its_callbacks() {
    let rig = Rig::new();
    let (owner, _journal) = rig.owner("owner");
    let (other, _other_journal) = rig.owner("other");
    let dropped = Calls::default();
    let kept = Calls::default();
    let doomed = Ctimer::new();
    let survivor = Ctimer::new();

    rig.ctimers.set_with_process(&doomed, 5, Some(&owner), dropped.callback());
    rig.ctimers.set_with_process(&survivor, 5, Some(&other), kept.callback());
    rig.kernel.exit(&owner);

    assert_eq!(rig.ctimers.registered(), 1);
    assert_eq!(rig.etimers.outstanding(), 1);

    rig.advance(5);
    assert_eq!(dropped.count(), 0);
    assert_eq!(kept.seen(), vec![other.id()]);
}

#[test]
fn service_starts_once() {
    let rig = Rig::new();
    let err = rig.ctimers.start(&rig.etimers).unwrap_err();
    let service = rig.ctimers.process().unwrap();

    assert!(matches!(err, KernelError::AlreadyStarted(id) if id == service.id()));
    assert_eq!(service.name(), CtimerService::PROCESS_NAME);
}

#[test]
fn owner_exiting_from_a_callback_cancels_its_other_timers() {
    let rig = Rig::new();
    let (owner, _journal) = rig.owner("owner");
    let later = Calls::default();
    let killer = Ctimer::new();
    let other = Ctimer::new();

    rig.ctimers
        .set_with_process(&killer, 5, Some(&owner), |cx| cx.exit(cx.process()));
    rig.ctimers.set_with_process(&other, 50, Some(&owner), later.callback());

    rig.advance(5);

    assert!(!owner.is_running());
    assert_eq!(rig.ctimers.registered(), 0);
    assert!(rig.ctimers.expired(&other));
    assert_eq!(rig.etimers.outstanding(), 0);

    rig.advance(50);
    assert_eq!(later.count(), 0);
}
