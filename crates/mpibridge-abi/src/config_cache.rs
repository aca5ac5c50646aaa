//! Process configuration, read from the environment once.

use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use mpibridge_core::BridgeConfig;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

// UNINIT -> INITIALIZING -> READY. A caller that finds INITIALIZING (another
// thread, or a re-entrant call from the same one) gets the defaults instead
// of waiting.
static CONFIG_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
static CONFIG_PTR: AtomicPtr<BridgeConfig> = AtomicPtr::new(std::ptr::null_mut());

fn cached() -> Option<&'static BridgeConfig> {
    let state = CONFIG_STATE.load(Ordering::Acquire);
    if state == STATE_READY {
        // SAFETY: once READY, CONFIG_PTR is valid and never changes.
        return Some(unsafe { &*CONFIG_PTR.load(Ordering::Acquire) });
    }
    if state == STATE_INITIALIZING {
        return None;
    }

    if CONFIG_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return if CONFIG_STATE.load(Ordering::Acquire) == STATE_READY {
            // SAFETY: as above.
            Some(unsafe { &*CONFIG_PTR.load(Ordering::Acquire) })
        } else {
            None
        };
    }

    // Leaked; lives for the rest of the process.
    let ptr = Box::into_raw(Box::new(BridgeConfig::from_env()));
    CONFIG_PTR.store(ptr, Ordering::Release);
    CONFIG_STATE.store(STATE_READY, Ordering::Release);
    // SAFETY: just published.
    Some(unsafe { &*ptr })
}

/// The process configuration, or the defaults while it is being read.
pub(crate) fn process_config() -> BridgeConfig {
    cached().cloned().unwrap_or_default()
}
