//! Idempotent StartUp / CleanUp lifecycle.
//!
//! The phase moves `Unstarted -> Starting -> Started -> Cleaning -> Cleaned`
//! and never goes back. Each forward edge is claimed with a compare-and-set,
//! so exactly one caller performs StartUp work and exactly one performs
//! CleanUp work, whichever of the three shutdown paths gets there first:
//! explicit [`LifecycleManager::clean_up`], the finalize hook fired by the
//! foreign runtime, or neither (process exit).
//!
//! Primitive failures never abort a transition. Each step's outcome lands in
//! the returned [`LifecycleReport`], the metrics, and the structured log.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::handle::{Endpoint, Errhandler, Keyval, STATUS_SUCCESS};
use crate::handler_store::HandlerStore;
use crate::hook_registry::HookRegistry;
use crate::metrics::{LifecycleMetrics, MetricsSnapshot};
use crate::report::{LifecycleReport, Operation, Transition};
use crate::runtime::{AttrDeleteArgs, FinalizeHook, ForeignRuntime};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel};

const PHASE_UNSTARTED: u8 = 0;
const PHASE_STARTING: u8 = 1;
const PHASE_STARTED: u8 = 2;
const PHASE_CLEANING: u8 = 3;
const PHASE_CLEANED: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Unstarted,
    Starting,
    Started,
    Cleaning,
    Cleaned,
}

impl LifecyclePhase {
    fn from_u8(v: u8) -> Self {
        match v {
            PHASE_STARTING => Self::Starting,
            PHASE_STARTED => Self::Started,
            PHASE_CLEANING => Self::Cleaning,
            PHASE_CLEANED => Self::Cleaned,
            _ => Self::Unstarted,
        }
    }

    /// The `started` flag: set from the first StartUp on, never cleared.
    #[must_use]
    pub const fn started(self) -> bool {
        !matches!(self, Self::Unstarted)
    }

    /// The `cleaned` flag: set once CleanUp has finished.
    #[must_use]
    pub const fn cleaned(self) -> bool {
        matches!(self, Self::Cleaned)
    }
}

/// Outcome of handing a window key to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKeyAdoption {
    /// The lifecycle now owns the key and frees it during CleanUp.
    Adopted,
    /// A key is already held; the caller keeps ownership of this one.
    AlreadyHeld,
    /// The key was the invalid sentinel.
    Invalid,
    /// CleanUp already ran, so the key was freed on the spot.
    ReleasedImmediately,
}

struct Inner<R> {
    runtime: R,
    config: BridgeConfig,
    phase: AtomicU8,
    handlers: HandlerStore,
    hooks: HookRegistry,
    metrics: LifecycleMetrics,
    log: Mutex<Option<LogEmitter>>,
}

/// Owner of the bridge's global foreign-runtime state.
///
/// Cloning yields another handle to the same lifecycle.
pub struct LifecycleManager<R: ForeignRuntime + 'static> {
    inner: Arc<Inner<R>>,
}

impl<R: ForeignRuntime + 'static> Clone for LifecycleManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ForeignRuntime + 'static> LifecycleManager<R> {
    #[must_use]
    pub fn new(runtime: R) -> Self {
        Self::with_config(runtime, BridgeConfig::default())
    }

    #[must_use]
    pub fn with_config(runtime: R, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                config,
                phase: AtomicU8::new(PHASE_UNSTARTED),
                handlers: HandlerStore::new(),
                hooks: HookRegistry::new(),
                metrics: LifecycleMetrics::new(),
                log: Mutex::new(None),
            }),
        }
    }

    /// Manager configured from the environment, logging to the configured
    /// target.
    pub fn from_env(runtime: R, run_id: &str) -> Result<Self, BridgeError> {
        let config = BridgeConfig::from_env();
        let emitter = LogEmitter::from_target(&config.log, run_id)?;
        let manager = Self::with_config(runtime, config);
        if let Some(emitter) = emitter {
            manager.set_log_emitter(emitter);
        }
        Ok(manager)
    }

    pub fn set_log_emitter(&self, emitter: LogEmitter) {
        *self.inner.log.lock() = Some(emitter);
    }

    /// Install the configured policy on both endpoints, remembering the
    /// previous ones, and attach the finalize hook to "self".
    ///
    /// Only the first call does anything.
    pub fn start_up(&self) -> LifecycleReport {
        let inner = &self.inner;
        LifecycleMetrics::inc(&inner.metrics.startup_calls);

        if let Err(current) = inner.phase.compare_exchange(
            PHASE_UNSTARTED,
            PHASE_STARTING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            LifecycleMetrics::inc(&inner.metrics.startup_noops);
            let transition = if current == PHASE_STARTING {
                Transition::InProgress
            } else {
                Transition::AlreadyDone
            };
            let report = LifecycleReport::new(Operation::StartUp, transition);
            inner.log_report(&report);
            return report;
        }

        let mut report = LifecycleReport::new(Operation::StartUp, Transition::Performed);
        let policy = inner
            .runtime
            .predefined_errhandler(inner.config.error_policy.predefined());
        for endpoint in Endpoint::ALL {
            inner
                .handlers
                .capture_and_install(&inner.runtime, endpoint, policy, &mut report);
        }
        if inner.config.finalize_hook {
            inner
                .hooks
                .attach(&inner.runtime, self.finalize_hook(), &mut report);
        }

        inner.phase.store(PHASE_STARTED, Ordering::SeqCst);
        inner.finish(&report);
        report
    }

    /// Free the owned keys, then restore and release the captured handlers.
    ///
    /// Only the first call after StartUp does anything; a call before StartUp
    /// is a no-op that leaves the lifecycle unstarted.
    pub fn clean_up(&self) -> LifecycleReport {
        self.inner.clean_up()
    }

    /// Body of the delete callback attached to "self". Ignores its arguments
    /// and returns CleanUp's status.
    pub fn finalize_callback(&self, args: AttrDeleteArgs) -> i32 {
        self.inner.finalize_callback(args)
    }

    /// Hand the memory-window key to the lifecycle.
    pub fn adopt_window_key(&self, key: Keyval) -> WindowKeyAdoption {
        let inner = &self.inner;
        if !key.is_valid() {
            return WindowKeyAdoption::Invalid;
        }
        if !inner.hooks.adopt_window_key(key) {
            return WindowKeyAdoption::AlreadyHeld;
        }

        // CleanUp takes the slot after entering Cleaning. If it may already
        // have done so, whoever takes the slot now frees the key.
        if inner.phase.load(Ordering::SeqCst) >= PHASE_CLEANING {
            let mut report = LifecycleReport::new(Operation::CleanUp, Transition::AlreadyDone);
            if inner.hooks.release_window_key(&inner.runtime, &mut report) {
                LifecycleMetrics::inc(&inner.metrics.keys_released);
                inner.finish(&report);
                return WindowKeyAdoption::ReleasedImmediately;
            }
        }
        WindowKeyAdoption::Adopted
    }

    fn finalize_hook(&self) -> FinalizeHook {
        let weak: Weak<Inner<R>> = Arc::downgrade(&self.inner);
        FinalizeHook::new(move |args| match weak.upgrade() {
            Some(inner) => inner.finalize_callback(args),
            None => STATUS_SUCCESS,
        })
    }

    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.phase().started()
    }

    #[must_use]
    pub fn is_cleaned(&self) -> bool {
        self.phase().cleaned()
    }

    /// Handler captured for `endpoint`; `Errhandler::NULL` when none is held.
    #[must_use]
    pub fn saved_handler(&self, endpoint: Endpoint) -> Errhandler {
        self.inner.handlers.saved(endpoint)
    }

    #[must_use]
    pub fn finalize_key(&self) -> Keyval {
        self.inner.hooks.finalize_key()
    }

    #[must_use]
    pub fn window_key(&self) -> Keyval {
        self.inner.hooks.window_key()
    }

    /// Whether matched probe/receive may be used with this runtime.
    #[must_use]
    pub fn use_matched_recv(&self) -> bool {
        self.inner
            .config
            .matched_recv
            .resolve(self.inner.runtime.supports_matched_probe())
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn runtime(&self) -> &R {
        &self.inner.runtime
    }
}

impl<R: ForeignRuntime + 'static> std::fmt::Debug for LifecycleManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("phase", &self.phase())
            .field("config", &self.inner.config)
            .field("finalize_key", &self.finalize_key())
            .field("window_key", &self.window_key())
            .finish_non_exhaustive()
    }
}

impl<R: ForeignRuntime> Inner<R> {
    fn clean_up(&self) -> LifecycleReport {
        LifecycleMetrics::inc(&self.metrics.cleanup_calls);

        if let Err(current) = self.phase.compare_exchange(
            PHASE_STARTED,
            PHASE_CLEANING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            LifecycleMetrics::inc(&self.metrics.cleanup_noops);
            let transition = match current {
                PHASE_UNSTARTED => Transition::NotStarted,
                PHASE_CLEANED => Transition::AlreadyDone,
                _ => Transition::InProgress,
            };
            let report = LifecycleReport::new(Operation::CleanUp, transition);
            self.log_report(&report);
            return report;
        }

        let mut report = LifecycleReport::new(Operation::CleanUp, Transition::Performed);
        let keys = self.hooks.release_all(&self.runtime, &mut report);
        LifecycleMetrics::add(&self.metrics.keys_released, keys as u64);

        for endpoint in [Endpoint::SelfComm, Endpoint::World] {
            if self.handlers.restore(&self.runtime, endpoint, &mut report) {
                LifecycleMetrics::inc(&self.metrics.handlers_restored);
            }
        }

        self.phase.store(PHASE_CLEANED, Ordering::SeqCst);
        self.finish(&report);
        report
    }

    fn finalize_callback(&self, args: AttrDeleteArgs) -> i32 {
        LifecycleMetrics::inc(&self.metrics.finalize_callbacks);
        if let Some(emitter) = self.log.lock().as_mut() {
            let entry = LogEntry::new("", LogLevel::Info, "lifecycle.finalize_callback")
                .with_details(serde_json::json!({ "keyval": args.keyval.0 }));
            // Advisory, like `log_report`.
            let _ = emitter.emit_entry(entry);
        }
        self.clean_up().status_code(self.config.strict_status)
    }

    fn finish(&self, report: &LifecycleReport) {
        let failures = report.failures().count() as u64;
        LifecycleMetrics::add(&self.metrics.primitive_failures, failures);
        self.log_report(report);
    }

    fn log_report(&self, report: &LifecycleReport) {
        if let Some(emitter) = self.log.lock().as_mut() {
            // Logging is advisory; a broken sink must not fail the lifecycle.
            let _ = emitter.emit_report(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Primitive;
    use crate::sim::{Call, ERRORS_ARE_FATAL, ERRORS_RETURN, SimRuntime};

    fn manager() -> LifecycleManager<Arc<SimRuntime>> {
        LifecycleManager::new(Arc::new(SimRuntime::new()))
    }

    #[test]
    fn phases_advance_in_order() {
        let m = manager();
        assert_eq!(m.phase(), LifecyclePhase::Unstarted);
        assert!(m.start_up().performed());
        assert_eq!(m.phase(), LifecyclePhase::Started);
        assert!(m.is_started() && !m.is_cleaned());
        assert!(m.clean_up().performed());
        assert_eq!(m.phase(), LifecyclePhase::Cleaned);
        assert!(m.is_started() && m.is_cleaned());
    }

    #[test]
    fn startup_installs_return_policy_and_hook() {
        let m = manager();
        let report = m.start_up();
        assert!(report.is_clean());
        let rt = m.runtime();
        assert_eq!(rt.current_errhandler(Endpoint::World), ERRORS_RETURN);
        assert_eq!(rt.current_errhandler(Endpoint::SelfComm), ERRORS_RETURN);
        assert_eq!(m.saved_handler(Endpoint::World), ERRORS_ARE_FATAL);
        assert!(rt.attr_attached(Endpoint::SelfComm, m.finalize_key()));
    }

    #[test]
    fn cleanup_releases_keys_before_restoring_handlers() {
        let m = manager();
        m.start_up();
        let rt = Arc::clone(m.runtime());
        let mark = rt.calls().len();
        m.clean_up();
        let calls = &rt.calls()[mark..];
        let first_restore = calls
            .iter()
            .position(|c| matches!(c, Call::SetErrhandler(..)))
            .unwrap();
        let key_free = calls
            .iter()
            .position(|c| matches!(c, Call::FreeKeyval(_)))
            .unwrap();
        assert!(key_free < first_restore);
        assert_eq!(
            calls[first_restore],
            Call::SetErrhandler(Endpoint::SelfComm, ERRORS_ARE_FATAL)
        );
    }

    #[test]
    fn cleanup_before_startup_is_noop() {
        let m = manager();
        let report = m.clean_up();
        assert_eq!(report.transition, Transition::NotStarted);
        assert_eq!(report.status_code(true), STATUS_SUCCESS);
        assert_eq!(m.phase(), LifecyclePhase::Unstarted);
        assert!(m.runtime().calls().is_empty());

        assert!(m.start_up().performed());
    }

    #[test]
    fn hook_disabled_by_config() {
        let config = BridgeConfig {
            finalize_hook: false,
            ..BridgeConfig::default()
        };
        let m = LifecycleManager::with_config(Arc::new(SimRuntime::new()), config);
        m.start_up();
        assert_eq!(m.finalize_key(), Keyval::INVALID);
        assert_eq!(m.runtime().count_calls(|c| *c == Call::CreateKeyval), 0);
    }

    #[test]
    fn fatal_policy_from_config() {
        let config = BridgeConfig {
            error_policy: crate::config::ErrorPolicy::Fatal,
            ..BridgeConfig::default()
        };
        let rt = Arc::new(SimRuntime::new());
        rt.install_user_errhandler(Endpoint::World);
        let m = LifecycleManager::with_config(Arc::clone(&rt), config);
        m.start_up();
        assert_eq!(rt.current_errhandler(Endpoint::World), ERRORS_ARE_FATAL);
    }

    #[test]
    fn strict_status_surfaces_through_finalize_callback() {
        let config = BridgeConfig {
            strict_status: true,
            ..BridgeConfig::default()
        };
        let rt = Arc::new(SimRuntime::new());
        let m = LifecycleManager::with_config(Arc::clone(&rt), config);
        m.start_up();
        rt.fail_next(Primitive::ErrhandlerFree, 33);
        assert_eq!(rt.finalize().unwrap(), vec![33]);
        assert!(m.is_cleaned());
    }

    #[test]
    fn hook_outliving_manager_is_harmless() {
        let rt = Arc::new(SimRuntime::new());
        {
            let m = LifecycleManager::new(Arc::clone(&rt));
            m.start_up();
        }
        assert_eq!(rt.finalize().unwrap(), vec![STATUS_SUCCESS]);
    }

    #[test]
    fn window_key_adoption_paths() {
        let m = manager();
        assert_eq!(m.adopt_window_key(Keyval::INVALID), WindowKeyAdoption::Invalid);
        let first = m.runtime().win_create_keyval();
        let second = m.runtime().win_create_keyval();
        assert_eq!(m.adopt_window_key(first), WindowKeyAdoption::Adopted);
        assert_eq!(m.adopt_window_key(second), WindowKeyAdoption::AlreadyHeld);

        m.start_up();
        m.clean_up();
        assert!(!m.runtime().win_keyval_live(first));
        assert!(m.runtime().win_keyval_live(second));

        assert_eq!(
            m.adopt_window_key(second),
            WindowKeyAdoption::ReleasedImmediately
        );
        assert!(!m.runtime().win_keyval_live(second));
        assert_eq!(m.window_key(), Keyval::INVALID);
    }

    #[test]
    fn metrics_count_calls_and_noops() {
        let m = manager();
        m.clean_up();
        m.start_up();
        m.start_up();
        m.clean_up();
        m.clean_up();
        let snap = m.metrics();
        assert_eq!(snap.startup_calls, 2);
        assert_eq!(snap.startup_noops, 1);
        assert_eq!(snap.cleanup_calls, 3);
        assert_eq!(snap.cleanup_noops, 2);
        assert_eq!(snap.handlers_restored, 2);
        assert_eq!(snap.keys_released, 1);
        assert_eq!(snap.primitive_failures, 0);
    }

    #[test]
    fn matched_recv_follows_runtime() {
        let m = LifecycleManager::new(SimRuntime::new().with_matched_probe(false));
        assert!(!m.use_matched_recv());
        let m = LifecycleManager::new(SimRuntime::new());
        assert!(m.use_matched_recv());
    }

    #[test]
    fn reports_reach_the_log() {
        let m = manager();
        let (emitter, buffer) = LogEmitter::to_buffer("lifecycle");
        m.set_log_emitter(emitter);
        m.start_up();
        m.runtime().finalize().unwrap();
        let entries = crate::structured_log::validate_log_text(&buffer.contents()).unwrap();
        let events: Vec<_> = entries.iter().map(|e| e.event.as_str()).collect();
        assert!(events.contains(&"lifecycle.startup"));
        assert!(events.contains(&"lifecycle.finalize_callback"));
        assert!(events.contains(&"lifecycle.cleanup"));
    }
}
