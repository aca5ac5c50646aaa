//! The process-wide lifecycle manager behind the C entry points.
//!
//! The slot lock is held only to install, remove, or clone the manager,
//! never across a call into MPI, so the finalize hook may fire from inside
//! any primitive without deadlocking.
//!
//! MPI cannot be initialized twice in one process. Once an installed
//! manager has cleaned up, the process is retired: the phase stays at
//! Cleaned after uninstall and no further runtime may be installed.

use std::sync::atomic::{AtomicBool, Ordering};

use mpibridge_core::{BridgeConfig, BridgeError, LifecycleManager, LifecyclePhase, LogEmitter};
use parking_lot::Mutex;

use crate::config_cache;
use crate::ffi::{MpiBridgeVtable, VtableRuntime};

pub type ProcessManager = LifecycleManager<VtableRuntime>;

static MANAGER: Mutex<Option<ProcessManager>> = Mutex::new(None);

/// Latched when a cleaned-up manager leaves the slot. Only written under
/// the `MANAGER` lock.
static RETIRED: AtomicBool = AtomicBool::new(false);

/// Install `table` with the process configuration.
pub fn install(table: &MpiBridgeVtable) -> Result<(), BridgeError> {
    install_with_config(table, config_cache::process_config())
}

/// Install `table` with an explicit configuration.
///
/// A log target that cannot be opened leaves the manager without a log.
pub fn install_with_config(table: &MpiBridgeVtable, config: BridgeConfig) -> Result<(), BridgeError> {
    let runtime = VtableRuntime::new(table)?;
    let mut slot = MANAGER.lock();
    if slot.is_some() {
        return Err(BridgeError::RuntimeAlreadyInstalled);
    }
    if RETIRED.load(Ordering::SeqCst) {
        return Err(BridgeError::LifecycleRetired);
    }

    let run_id = format!("mpibridge-{}", std::process::id());
    let emitter = LogEmitter::from_target(&config.log, &run_id).ok().flatten();
    let manager = LifecycleManager::with_config(runtime, config);
    if let Some(emitter) = emitter {
        manager.set_log_emitter(emitter);
    }
    *slot = Some(manager);
    Ok(())
}

/// Drop the installed manager.
///
/// Refused between StartUp and CleanUp: the finalize hook would fire
/// against a manager nobody can reach any more. Dropping a cleaned-up
/// manager retires the process.
pub fn uninstall() -> Result<(), BridgeError> {
    let mut slot = MANAGER.lock();
    let Some(manager) = slot.as_ref() else {
        return Err(BridgeError::RuntimeNotInstalled);
    };
    match manager.phase() {
        LifecyclePhase::Starting | LifecyclePhase::Started | LifecyclePhase::Cleaning => {
            return Err(BridgeError::LifecycleActive);
        }
        LifecyclePhase::Cleaned => RETIRED.store(true, Ordering::SeqCst),
        LifecyclePhase::Unstarted => {}
    }
    *slot = None;
    Ok(())
}

/// Handle to the installed manager.
pub fn manager() -> Option<ProcessManager> {
    MANAGER.lock().clone()
}

/// Phase of the process lifecycle, installed manager or not.
pub fn phase() -> LifecyclePhase {
    let slot = MANAGER.lock();
    match slot.as_ref() {
        Some(manager) => manager.phase(),
        None if RETIRED.load(Ordering::SeqCst) => LifecyclePhase::Cleaned,
        None => LifecyclePhase::Unstarted,
    }
}

pub(crate) fn runtime() -> Option<VtableRuntime> {
    MANAGER.lock().as_ref().map(|m| *m.runtime())
}

/// Test hook: drop the installed manager and clear the retired latch.
#[doc(hidden)]
pub fn reset_process_state_for_tests() {
    let mut slot = MANAGER.lock();
    *slot = None;
    RETIRED.store(false, Ordering::SeqCst);
}
