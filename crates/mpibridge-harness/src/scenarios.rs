//! Shutdown-path scenarios run against the simulated runtime.
//!
//! Each scenario drives one way the process can end (explicit CleanUp, the
//! runtime's finalize firing the hook, plain exit) or a degraded runtime, and
//! checks the lifecycle invariants along the way.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use mpibridge_core::sim::{Call, ERRORS_ARE_FATAL, ERRORS_RETURN, ERR_COMM, SimOutcome};
use mpibridge_core::{
    BridgeConfig, Endpoint, Keyval, LifecycleManager, LifecyclePhase, LifecycleReport, LogEmitter,
    MetricsSnapshot, Primitive, STATUS_SUCCESS, SimRuntime, Transition,
};

use crate::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPath {
    /// The host calls CleanUp before finalizing the runtime.
    Explicit,
    /// The runtime's finalize fires the hook; CleanUp is never called.
    Finalize,
    /// Neither happens before the process exits.
    Exit,
    /// Primitives fail during both transitions.
    Degraded,
}

impl ShutdownPath {
    pub const ALL: [ShutdownPath; 4] = [
        ShutdownPath::Explicit,
        ShutdownPath::Finalize,
        ShutdownPath::Exit,
        ShutdownPath::Degraded,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Finalize => "finalize",
            Self::Exit => "exit",
            Self::Degraded => "degraded",
        }
    }

    /// Parse a path name; `all` selects every path.
    pub fn parse_selection(raw: &str) -> Result<Vec<Self>, HarnessError> {
        let raw = raw.trim().to_ascii_lowercase();
        if raw == "all" {
            return Ok(Self::ALL.to_vec());
        }
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == raw)
            .map(|p| vec![p])
            .ok_or(HarnessError::UnknownPath(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub path: ShutdownPath,
    pub passed: bool,
    pub checks: Vec<Check>,
    pub reports: Vec<LifecycleReport>,
    pub metrics: MetricsSnapshot,
}

impl ScenarioOutcome {
    #[must_use]
    pub fn failed_checks(&self) -> Vec<&Check> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

/// Collects checks and reports for one scenario.
struct Recorder {
    checks: Vec<Check>,
    reports: Vec<LifecycleReport>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            checks: Vec::new(),
            reports: Vec::new(),
        }
    }

    fn check(&mut self, name: &str, passed: bool) {
        self.checks.push(Check {
            name: name.to_string(),
            passed,
            detail: None,
        });
    }

    fn check_eq<T: PartialEq + std::fmt::Debug>(&mut self, name: &str, actual: T, expected: T) {
        let passed = actual == expected;
        self.checks.push(Check {
            name: name.to_string(),
            passed,
            detail: (!passed).then(|| format!("expected {expected:?}, got {actual:?}")),
        });
    }

    fn keep(&mut self, report: LifecycleReport) -> LifecycleReport {
        self.reports.push(report.clone());
        report
    }

    fn finish(self, path: ShutdownPath, metrics: MetricsSnapshot) -> ScenarioOutcome {
        ScenarioOutcome {
            path,
            passed: self.checks.iter().all(|c| c.passed),
            checks: self.checks,
            reports: self.reports,
            metrics,
        }
    }
}

type SimManager = LifecycleManager<Arc<SimRuntime>>;

fn setup(
    config: BridgeConfig,
    log: Option<&Path>,
    path: ShutdownPath,
) -> Result<(Arc<SimRuntime>, SimManager), HarnessError> {
    let rt = Arc::new(SimRuntime::new());
    let manager = LifecycleManager::with_config(Arc::clone(&rt), config);
    if let Some(log) = log {
        let run_id = format!("harness-{}", path.as_str());
        manager.set_log_emitter(LogEmitter::to_file(log, &run_id)?);
    }
    Ok((rt, manager))
}

/// Run one scenario, appending its events to `log` when given.
pub fn run_scenario(
    path: ShutdownPath,
    log: Option<&Path>,
) -> Result<ScenarioOutcome, HarnessError> {
    let config = BridgeConfig::default();
    let (rt, manager) = setup(config, log, path)?;
    let mut rec = Recorder::new();

    match path {
        ShutdownPath::Explicit => explicit(&rt, &manager, &mut rec),
        ShutdownPath::Finalize => finalize(&rt, &manager, &mut rec),
        ShutdownPath::Exit => {
            let metrics = exit(rt, manager, &mut rec);
            return Ok(rec.finish(path, metrics));
        }
        ShutdownPath::Degraded => degraded(&rt, &manager, &mut rec),
    }
    Ok(rec.finish(path, manager.metrics()))
}

/// Run every scenario in `paths`.
pub fn run_all(
    paths: &[ShutdownPath],
    log: Option<&Path>,
) -> Result<Vec<ScenarioOutcome>, HarnessError> {
    paths.iter().map(|p| run_scenario(*p, log)).collect()
}

fn started_with_return_policy(rt: &SimRuntime, manager: &SimManager, rec: &mut Recorder) {
    let report = rec.keep(manager.start_up());
    rec.check("startup.performed", report.performed());
    rec.check("startup.clean", report.is_clean());
    for endpoint in Endpoint::ALL {
        rec.check_eq(
            &format!("startup.policy.{endpoint}"),
            rt.current_errhandler(endpoint),
            ERRORS_RETURN,
        );
    }
    rec.check(
        "startup.hook_attached",
        rt.attr_attached(Endpoint::SelfComm, manager.finalize_key()),
    );

    let again = rec.keep(manager.start_up());
    rec.check_eq("startup.repeat_is_noop", again.transition, Transition::AlreadyDone);
    rec.check_eq(
        "startup.single_capture",
        rt.count_calls(|c| matches!(c, Call::GetErrhandler(_))),
        2,
    );
}

fn explicit(rt: &SimRuntime, manager: &SimManager, rec: &mut Recorder) {
    let original = rt.install_user_errhandler(Endpoint::World);
    started_with_return_policy(rt, manager, rec);
    rec.check(
        "failing_op_returns_code",
        matches!(rt.invoke_failing_operation(Endpoint::World), SimOutcome::Returned(_)),
    );

    let report = rec.keep(manager.clean_up());
    rec.check("cleanup.performed", report.performed());
    rec.check_eq("cleanup.status", report.status_code(true), STATUS_SUCCESS);
    rec.check_eq("cleanup.world_restored", rt.current_errhandler(Endpoint::World), original);
    rec.check_eq(
        "cleanup.self_restored",
        rt.current_errhandler(Endpoint::SelfComm),
        ERRORS_ARE_FATAL,
    );
    rec.check_eq("cleanup.refs_released", rt.outstanding_errhandler_refs(), 0);
    rec.check_eq("cleanup.finalize_key_invalid", manager.finalize_key(), Keyval::INVALID);

    let again = rec.keep(manager.clean_up());
    rec.check_eq("cleanup.repeat_is_noop", again.transition, Transition::AlreadyDone);

    let before = rt.calls().len();
    let statuses = rt.finalize().unwrap_or_default();
    rec.check("finalize.hook_succeeds", statuses.iter().all(|s| *s == STATUS_SUCCESS));
    rec.check_eq(
        "finalize.no_second_cleanup",
        count_since(rt, before, |c| {
            matches!(c, Call::SetErrhandler(..) | Call::FreeKeyval(_))
        }),
        0,
    );
}

fn count_since(rt: &SimRuntime, from: usize, pred: impl Fn(&Call) -> bool) -> usize {
    rt.calls()[from..].iter().filter(|c| pred(c)).count()
}

fn finalize(rt: &SimRuntime, manager: &SimManager, rec: &mut Recorder) {
    started_with_return_policy(rt, manager, rec);

    let statuses = rt.finalize();
    rec.check_eq("finalize.statuses", statuses, Some(vec![STATUS_SUCCESS]));
    rec.check_eq("finalize.phase", manager.phase(), LifecyclePhase::Cleaned);
    rec.check_eq(
        "finalize.world_restored",
        rt.current_errhandler(Endpoint::World),
        ERRORS_ARE_FATAL,
    );
    rec.check_eq("finalize.refs_released", rt.outstanding_errhandler_refs(), 0);

    let before = rt.calls().len();
    let report = rec.keep(manager.clean_up());
    rec.check_eq("cleanup.after_finalize_is_noop", report.transition, Transition::AlreadyDone);
    rec.check_eq("cleanup.no_primitive_calls", rt.calls().len(), before);
}

fn exit(rt: Arc<SimRuntime>, manager: SimManager, rec: &mut Recorder) -> MetricsSnapshot {
    started_with_return_policy(&rt, &manager, rec);
    rec.check_eq("exit.phase_left_started", manager.phase(), LifecyclePhase::Started);

    // The embedder goes away without cleaning up; a late finalize must only
    // see a dangling hook.
    let metrics = manager.metrics();
    drop(manager);
    let before = rt.calls().len();
    let statuses = rt.finalize();
    rec.check_eq("exit.late_finalize_statuses", statuses, Some(vec![STATUS_SUCCESS]));
    rec.check_eq(
        "exit.late_finalize_touches_nothing",
        count_since(&rt, before, |c| matches!(c, Call::SetErrhandler(..))),
        0,
    );
    metrics
}

fn degraded(rt: &SimRuntime, manager: &SimManager, rec: &mut Recorder) {
    rt.fail_always(Primitive::CommSetErrhandler, ERR_COMM);
    rt.fail_next(Primitive::CommCreateKeyval, ERR_COMM);

    let report = rec.keep(manager.start_up());
    rec.check("startup.performed", report.performed());
    rec.check_eq("startup.failures", report.failures().count(), 3);
    rec.check_eq("startup.lenient_status", report.status_code(false), STATUS_SUCCESS);
    rec.check_eq("startup.phase", manager.phase(), LifecyclePhase::Started);
    rec.check_eq("startup.finalize_key_invalid", manager.finalize_key(), Keyval::INVALID);

    let report = rec.keep(manager.clean_up());
    rec.check("cleanup.performed", report.performed());
    rec.check_eq("cleanup.phase", manager.phase(), LifecyclePhase::Cleaned);
    rec.check_eq("cleanup.refs_released", rt.outstanding_errhandler_refs(), 0);
    rec.check_eq(
        "cleanup.no_key_free",
        rt.count_calls(|c| matches!(c, Call::FreeKeyval(_))),
        0,
    );
    rec.check_eq("metrics.failures", manager.metrics().primitive_failures, 5);
    rt.clear_faults();
}
