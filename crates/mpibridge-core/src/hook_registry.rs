//! Attribute keys owned by the lifecycle.
//!
//! The finalize key carries the delete callback that the runtime fires while
//! destroying the "self" endpoint during finalize. The window key belongs to
//! the memory-window component; it is only adopted and released here.

use parking_lot::Mutex;

use crate::handle::{Endpoint, Keyval};
use crate::report::{LifecycleReport, Step};
use crate::runtime::{FinalizeHook, ForeignRuntime};

#[derive(Debug)]
pub struct HookRegistry {
    finalize_key: Mutex<Keyval>,
    window_key: Mutex<Keyval>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            finalize_key: Mutex::new(Keyval::INVALID),
            window_key: Mutex::new(Keyval::INVALID),
        }
    }

    #[must_use]
    pub fn finalize_key(&self) -> Keyval {
        *self.finalize_key.lock()
    }

    #[must_use]
    pub fn window_key(&self) -> Keyval {
        *self.window_key.lock()
    }

    /// Create the finalize key and attach it to "self" with a nil payload.
    ///
    /// No-op while a valid key is held. A failed creation leaves the key
    /// invalid and skips the attach.
    pub fn attach<R: ForeignRuntime + ?Sized>(
        &self,
        runtime: &R,
        hook: FinalizeHook,
        report: &mut LifecycleReport,
    ) {
        if self.finalize_key().is_valid() {
            return;
        }

        let created = runtime.comm_create_keyval(hook);
        report.record(Step::CreateFinalizeKey, &created);
        let Ok(key) = created else {
            return;
        };
        if !key.is_valid() {
            return;
        }
        *self.finalize_key.lock() = key;

        let attached = runtime.comm_set_attr(Endpoint::SelfComm, key);
        report.record(Step::AttachFinalizeKey, &attached);
    }

    /// Take ownership of the memory-window key.
    ///
    /// Returns false when `key` is invalid or a valid key is already held.
    pub fn adopt_window_key(&self, key: Keyval) -> bool {
        if !key.is_valid() {
            return false;
        }
        let mut slot = self.window_key.lock();
        if slot.is_valid() {
            return false;
        }
        *slot = key;
        true
    }

    /// Free both keys, finalize key first. Each is freed at most once.
    pub fn release_all<R: ForeignRuntime + ?Sized>(
        &self,
        runtime: &R,
        report: &mut LifecycleReport,
    ) -> usize {
        let mut released = 0;

        let key = std::mem::replace(&mut *self.finalize_key.lock(), Keyval::INVALID);
        if key.is_valid() {
            let freed = runtime.comm_free_keyval(key);
            report.record(Step::FreeFinalizeKey, &freed);
            released += 1;
        }

        if self.release_window_key(runtime, report) {
            released += 1;
        }

        released
    }

    /// Free the window key if one is held. Returns true when a key was taken.
    pub fn release_window_key<R: ForeignRuntime + ?Sized>(
        &self,
        runtime: &R,
        report: &mut LifecycleReport,
    ) -> bool {
        let key = std::mem::replace(&mut *self.window_key.lock(), Keyval::INVALID);
        if !key.is_valid() {
            return false;
        }
        let freed = runtime.win_free_keyval(key);
        report.record(Step::FreeWindowKey, &freed);
        true
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
