use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use mpibridge_core::sim::{Call, ERR_COMM, ERR_OTHER, ERRORS_ARE_FATAL, ERRORS_RETURN, SimOutcome};
use mpibridge_core::{
    Endpoint, Keyval, LifecycleManager, LifecyclePhase, Primitive, STATUS_SUCCESS, SimRuntime,
    Transition, WindowKeyAdoption,
};

type Manager = LifecycleManager<Arc<SimRuntime>>;

fn fresh() -> (Arc<SimRuntime>, Manager) {
    let rt = Arc::new(SimRuntime::new());
    let m = LifecycleManager::new(Arc::clone(&rt));
    (rt, m)
}

/// Journal with the runtime's own finalize bookkeeping stripped out.
fn primitive_calls(rt: &SimRuntime, from: usize) -> Vec<Call> {
    rt.calls()[from..]
        .iter()
        .copied()
        .filter(|c| !matches!(c, Call::Finalize | Call::AttrDelete(..)))
        .collect()
}

#[test]
fn repeated_startup_acts_once() {
    let (rt, m) = fresh();
    let reports: Vec<_> = (0..5).map(|_| m.start_up()).collect();

    assert!(reports[0].performed());
    assert!(reports[1..]
        .iter()
        .all(|r| r.transition == Transition::AlreadyDone && r.steps.is_empty()));
    assert_eq!(rt.count_calls(|c| matches!(c, Call::GetErrhandler(_))), 2);
    assert_eq!(rt.count_calls(|c| matches!(c, Call::SetErrhandler(..))), 2);
    assert_eq!(rt.count_calls(|c| *c == Call::CreateKeyval), 1);
    assert_eq!(rt.count_calls(|c| matches!(c, Call::SetAttr(..))), 1);
}

#[test]
fn repeated_cleanup_restores_original_policy_once() {
    let (rt, m) = fresh();
    let original = rt.install_user_errhandler(Endpoint::World);
    m.start_up();
    for _ in 0..4 {
        m.clean_up();
    }

    assert_eq!(rt.current_errhandler(Endpoint::World), original);
    assert_eq!(rt.current_errhandler(Endpoint::SelfComm), ERRORS_ARE_FATAL);
    assert_eq!(
        rt.count_calls(|c| *c == Call::SetErrhandler(Endpoint::World, original)),
        1
    );
    assert_eq!(rt.count_calls(|c| matches!(c, Call::FreeErrhandler(_))), 2);
    assert_eq!(rt.outstanding_errhandler_refs(), 0);
    assert_eq!(m.saved_handler(Endpoint::World), mpibridge_core::Errhandler::NULL);
    assert_eq!(m.saved_handler(Endpoint::SelfComm), mpibridge_core::Errhandler::NULL);
}

#[test]
fn cleanup_without_startup_touches_nothing() {
    let (rt, m) = fresh();
    let report = m.clean_up();
    assert_eq!(report.transition, Transition::NotStarted);
    assert_eq!(report.status_code(false), STATUS_SUCCESS);
    assert!(rt.calls().is_empty());
    assert!(!m.is_started());
    assert!(!m.is_cleaned());
}

#[test]
fn finalize_callback_matches_explicit_cleanup() {
    let (rt_a, explicit) = fresh();
    let (rt_b, finalized) = fresh();
    explicit.start_up();
    finalized.start_up();
    let mark_a = rt_a.calls().len();
    let mark_b = rt_b.calls().len();

    explicit.clean_up();
    assert_eq!(rt_b.finalize(), Some(vec![STATUS_SUCCESS]));

    assert_eq!(primitive_calls(&rt_a, mark_a), primitive_calls(&rt_b, mark_b));
    for endpoint in Endpoint::ALL {
        assert_eq!(
            rt_a.current_errhandler(endpoint),
            rt_b.current_errhandler(endpoint)
        );
    }
    assert_eq!(explicit.phase(), finalized.phase());
    assert_eq!(explicit.finalize_key(), finalized.finalize_key());
}

#[test]
fn finalize_callback_called_directly_is_cleanup() {
    let (rt, m) = fresh();
    m.start_up();
    let status = m.finalize_callback(mpibridge_core::AttrDeleteArgs::empty());
    assert_eq!(status, STATUS_SUCCESS);
    assert!(m.is_cleaned());
    assert_eq!(rt.current_errhandler(Endpoint::World), ERRORS_ARE_FATAL);
    assert_eq!(m.metrics().finalize_callbacks, 1);
}

#[test]
fn keys_invalid_after_cleanup_and_never_freed_twice() {
    let (rt, m) = fresh();
    let win = rt.win_create_keyval();
    m.start_up();
    assert_eq!(m.adopt_window_key(win), WindowKeyAdoption::Adopted);
    let finalize_key = m.finalize_key();
    assert!(finalize_key.is_valid());

    m.clean_up();
    assert_eq!(m.finalize_key(), Keyval::INVALID);
    assert_eq!(m.window_key(), Keyval::INVALID);

    m.clean_up();
    // The attribute is still attached; its callback sees a finished lifecycle.
    assert_eq!(rt.finalize(), Some(vec![STATUS_SUCCESS]));

    assert_eq!(rt.count_calls(|c| *c == Call::FreeKeyval(finalize_key)), 1);
    assert_eq!(rt.count_calls(|c| *c == Call::WinFreeKeyval(win)), 1);
    assert!(!rt.keyval_live(finalize_key));
    assert!(!rt.win_keyval_live(win));
}

#[test]
fn scenario_error_codes_instead_of_abort() {
    let (rt, m) = fresh();
    assert_eq!(
        rt.invoke_failing_operation(Endpoint::World),
        SimOutcome::Aborted(ERR_OTHER)
    );

    m.start_up();
    assert_eq!(rt.current_errhandler(Endpoint::World), ERRORS_RETURN);
    assert_eq!(
        rt.invoke_failing_operation(Endpoint::World),
        SimOutcome::Returned(ERR_OTHER)
    );

    m.clean_up();
    assert_eq!(rt.current_errhandler(Endpoint::World), ERRORS_ARE_FATAL);
    assert_eq!(
        rt.invoke_failing_operation(Endpoint::World),
        SimOutcome::Aborted(ERR_OTHER)
    );
}

#[test]
fn scenario_runtime_finalize_drives_cleanup() {
    let (rt, m) = fresh();
    m.start_up();
    assert_eq!(rt.finalize(), Some(vec![STATUS_SUCCESS]));
    assert_eq!(m.phase(), LifecyclePhase::Cleaned);
    assert_eq!(rt.outstanding_errhandler_refs(), 0);

    let before = rt.calls().len();
    let report = m.clean_up();
    assert_eq!(report.transition, Transition::AlreadyDone);
    assert_eq!(rt.calls().len(), before);
}

#[test]
fn failing_primitives_do_not_stop_transitions() {
    let (rt, m) = fresh();
    rt.fail_always(Primitive::CommSetErrhandler, ERR_COMM);
    let report = m.start_up();
    assert!(report.performed());
    assert_eq!(report.steps.len(), 6);
    assert_eq!(report.failures().count(), 2);
    assert_eq!(report.status_code(false), STATUS_SUCCESS);
    assert_eq!(report.status_code(true), ERR_COMM);
    assert_eq!(m.phase(), LifecyclePhase::Started);
    assert!(m.finalize_key().is_valid());

    let report = m.clean_up();
    assert!(report.performed());
    assert_eq!(m.phase(), LifecyclePhase::Cleaned);
    assert_eq!(report.failures().count(), 2);
    // Handler references are still released.
    assert_eq!(rt.outstanding_errhandler_refs(), 0);
    assert_eq!(m.metrics().primitive_failures, 4);
}

#[test]
fn failed_capture_leaves_nothing_to_restore() {
    let (rt, m) = fresh();
    rt.fail_next(Primitive::CommGetErrhandler, ERR_COMM);
    m.start_up();
    assert!(m.saved_handler(Endpoint::World).is_null());
    assert_eq!(rt.current_errhandler(Endpoint::World), ERRORS_RETURN);

    m.clean_up();
    assert_eq!(
        rt.count_calls(|c| matches!(c, Call::SetErrhandler(Endpoint::World, _))),
        1
    );
    assert_eq!(rt.current_errhandler(Endpoint::SelfComm), ERRORS_ARE_FATAL);
}

#[test]
fn failed_key_creation_is_skipped_at_cleanup() {
    let (rt, m) = fresh();
    rt.fail_next(Primitive::CommCreateKeyval, ERR_COMM);
    m.start_up();
    assert_eq!(m.finalize_key(), Keyval::INVALID);
    m.clean_up();
    assert_eq!(rt.count_calls(|c| matches!(c, Call::FreeKeyval(_))), 0);
    assert_eq!(rt.finalize(), Some(Vec::new()));
}

#[test]
fn concurrent_callers_perform_each_transition_once() {
    let (rt, m) = fresh();

    let starters: Vec<_> = (0..8)
        .map(|_| {
            let m = m.clone();
            thread::spawn(move || m.start_up().performed())
        })
        .collect();
    let performed = starters
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|p| *p)
        .count();
    assert_eq!(performed, 1);

    let cleaners: Vec<_> = (0..8)
        .map(|_| {
            let m = m.clone();
            thread::spawn(move || m.clean_up().performed())
        })
        .collect();
    let performed = cleaners
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|p| *p)
        .count();
    assert_eq!(performed, 1);

    assert_eq!(rt.count_calls(|c| matches!(c, Call::FreeErrhandler(_))), 2);
    assert_eq!(rt.outstanding_errhandler_refs(), 0);
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

#[test]
fn deterministic_call_sequences_hold_invariants() {
    const SEEDS: [u64; 6] = [1, 2, 3, 4, 5, 6];
    const STEPS: usize = 40;

    for seed in SEEDS {
        let (rt, m) = fresh();
        let mut rng = XorShift64 { state: seed };
        let mut last_phase = m.phase();

        for _ in 0..STEPS {
            match rng.next_u64() % 4 {
                0 => {
                    m.start_up();
                }
                1 => {
                    m.clean_up();
                }
                2 => {
                    rt.finalize();
                }
                _ => {
                    let key = rt.win_create_keyval();
                    m.adopt_window_key(key);
                }
            }

            let phase = m.phase();
            assert!(phase >= last_phase, "seed {seed}: phase went backwards");
            assert_ne!(phase, LifecyclePhase::Starting);
            assert_ne!(phase, LifecyclePhase::Cleaning);
            last_phase = phase;

            assert!(rt.count_calls(|c| matches!(c, Call::FreeKeyval(_))) <= 1);
            assert!(rt.count_calls(|c| *c == Call::CreateKeyval) <= 1);
            let mut freed = HashSet::new();
            for call in rt.calls() {
                if let Call::WinFreeKeyval(key) = call {
                    assert!(freed.insert(key), "seed {seed}: window key {key:?} freed twice");
                }
            }
        }

        m.clean_up();
        assert_eq!(rt.outstanding_errhandler_refs(), 0, "seed {seed}");
        let snap = m.metrics();
        assert!(snap.startup_calls >= snap.startup_noops);
        assert!(snap.cleanup_calls >= snap.cleanup_noops);
    }
}
