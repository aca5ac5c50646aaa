//! Exported lifecycle entry points.
//!
//! Non-negative returns are MPI status codes or query results; negative
//! returns are bridge errors (`MPIBRIDGE_ERR_*`).

use std::ffi::c_int;

use mpibridge_core::{BridgeError, LifecyclePhase, MetricsSnapshot, WindowKeyAdoption};

use crate::bridge_state;
use crate::ffi::{MpiBridgeVtable, TRAMPOLINE_PANIC_STATUS};

pub const MPIBRIDGE_OK: c_int = 0;
pub const MPIBRIDGE_ERR_NULL_ARG: c_int = -1;
pub const MPIBRIDGE_ERR_NOT_INSTALLED: c_int = -2;
pub const MPIBRIDGE_ERR_ALREADY_INSTALLED: c_int = -3;
pub const MPIBRIDGE_ERR_INCOMPLETE_RUNTIME: c_int = -4;
pub const MPIBRIDGE_ERR_ACTIVE: c_int = -5;
pub const MPIBRIDGE_ERR_PANIC: c_int = TRAMPOLINE_PANIC_STATUS;
pub const MPIBRIDGE_ERR_INTERNAL: c_int = -7;
pub const MPIBRIDGE_ERR_RETIRED: c_int = -8;

pub const MPIBRIDGE_WIN_KEY_ADOPTED: c_int = 0;
pub const MPIBRIDGE_WIN_KEY_ALREADY_HELD: c_int = 1;
pub const MPIBRIDGE_WIN_KEY_INVALID: c_int = 2;
pub const MPIBRIDGE_WIN_KEY_RELEASED: c_int = 3;

/// Counter snapshot laid out for C.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MpiBridgeMetrics {
    pub startup_calls: u64,
    pub startup_noops: u64,
    pub cleanup_calls: u64,
    pub cleanup_noops: u64,
    pub finalize_callbacks: u64,
    pub primitive_failures: u64,
    pub handlers_restored: u64,
    pub keys_released: u64,
}

impl From<MetricsSnapshot> for MpiBridgeMetrics {
    fn from(s: MetricsSnapshot) -> Self {
        Self {
            startup_calls: s.startup_calls,
            startup_noops: s.startup_noops,
            cleanup_calls: s.cleanup_calls,
            cleanup_noops: s.cleanup_noops,
            finalize_callbacks: s.finalize_callbacks,
            primitive_failures: s.primitive_failures,
            handlers_restored: s.handlers_restored,
            keys_released: s.keys_released,
        }
    }
}

fn error_code(err: &BridgeError) -> c_int {
    match err {
        BridgeError::RuntimeNotInstalled => MPIBRIDGE_ERR_NOT_INSTALLED,
        BridgeError::RuntimeAlreadyInstalled => MPIBRIDGE_ERR_ALREADY_INSTALLED,
        BridgeError::IncompleteRuntime(_) => MPIBRIDGE_ERR_INCOMPLETE_RUNTIME,
        BridgeError::LifecycleActive => MPIBRIDGE_ERR_ACTIVE,
        BridgeError::LifecycleRetired => MPIBRIDGE_ERR_RETIRED,
        BridgeError::InvalidConfig { .. } | BridgeError::Log(_) | BridgeError::Serialize(_) => {
            MPIBRIDGE_ERR_INTERNAL
        }
    }
}

fn status_of(result: Result<(), BridgeError>) -> c_int {
    match result {
        Ok(()) => MPIBRIDGE_OK,
        Err(err) => error_code(&err),
    }
}

abi_fn! {
    /// Install the MPI function table. The table is copied. Refused once
    /// the process has cleaned up.
    unsafe fn mpibridge_install_runtime(table: *const MpiBridgeVtable) -> c_int {
        if table.is_null() {
            return MPIBRIDGE_ERR_NULL_ARG;
        }
        // SAFETY: caller passes a readable, initialized table.
        status_of(bridge_state::install(&*table))
    }
}

abi_fn! {
    /// Forget the installed table. Fails while the lifecycle is active.
    fn mpibridge_uninstall_runtime() -> c_int {
        status_of(bridge_state::uninstall())
    }
}

abi_fn! {
    /// StartUp. Returns the MPI status of the transition.
    fn mpibridge_startup() -> c_int {
        let Some(manager) = bridge_state::manager() else {
            return MPIBRIDGE_ERR_NOT_INSTALLED;
        };
        manager.start_up().status_code(manager.config().strict_status)
    }
}

abi_fn! {
    /// CleanUp. Without an installed runtime nothing was started, so this is
    /// a successful no-op.
    fn mpibridge_cleanup() -> c_int {
        let Some(manager) = bridge_state::manager() else {
            return MPIBRIDGE_OK;
        };
        manager.clean_up().status_code(manager.config().strict_status)
    }
}

abi_fn! {
    /// Hand the memory-window keyval to the lifecycle.
    fn mpibridge_adopt_win_keyval(keyval: c_int) -> c_int {
        let Some(manager) = bridge_state::manager() else {
            return MPIBRIDGE_ERR_NOT_INSTALLED;
        };
        let key = manager.runtime().keyval_from_raw(keyval);
        match manager.adopt_window_key(key) {
            WindowKeyAdoption::Adopted => MPIBRIDGE_WIN_KEY_ADOPTED,
            WindowKeyAdoption::AlreadyHeld => MPIBRIDGE_WIN_KEY_ALREADY_HELD,
            WindowKeyAdoption::Invalid => MPIBRIDGE_WIN_KEY_INVALID,
            WindowKeyAdoption::ReleasedImmediately => MPIBRIDGE_WIN_KEY_RELEASED,
        }
    }
}

abi_fn! {
    /// 0 unstarted, 1 starting, 2 started, 3 cleaning, 4 cleaned.
    fn mpibridge_lifecycle_phase() -> c_int {
        match bridge_state::phase() {
            LifecyclePhase::Unstarted => 0,
            LifecyclePhase::Starting => 1,
            LifecyclePhase::Started => 2,
            LifecyclePhase::Cleaning => 3,
            LifecyclePhase::Cleaned => 4,
        }
    }
}

abi_fn! {
    /// 1 when matched probe/receive may be used, 0 otherwise.
    fn mpibridge_use_matched_recv() -> c_int {
        match bridge_state::manager() {
            Some(m) => c_int::from(m.use_matched_recv()),
            None => MPIBRIDGE_ERR_NOT_INSTALLED,
        }
    }
}

abi_fn! {
    /// Copy the lifecycle counters into `out`.
    unsafe fn mpibridge_metrics(out: *mut MpiBridgeMetrics) -> c_int {
        if out.is_null() {
            return MPIBRIDGE_ERR_NULL_ARG;
        }
        let Some(manager) = bridge_state::manager() else {
            return MPIBRIDGE_ERR_NOT_INSTALLED;
        };
        // SAFETY: caller passes a writable struct.
        *out = manager.metrics().into();
        MPIBRIDGE_OK
    }
}
