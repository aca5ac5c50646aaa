//! Saved error-handling policy for the predefined endpoints.

use parking_lot::Mutex;

use crate::handle::{Endpoint, Errhandler};
use crate::report::{LifecycleReport, Step};
use crate::runtime::ForeignRuntime;

/// One captured handler slot per endpoint.
///
/// Slots are never locked across a foreign call: a delete callback fired
/// from inside a primitive may re-enter the lifecycle.
#[derive(Debug)]
pub struct HandlerStore {
    saved: [Mutex<Errhandler>; 2],
}

impl HandlerStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            saved: [Mutex::new(Errhandler::NULL), Mutex::new(Errhandler::NULL)],
        }
    }

    /// Handler captured for `endpoint`, or `Errhandler::NULL`.
    #[must_use]
    pub fn saved(&self, endpoint: Endpoint) -> Errhandler {
        *self.saved[endpoint.index()].lock()
    }

    /// Capture the current policy of `endpoint` and install `policy`.
    ///
    /// Does nothing while a capture is already held. Installation is
    /// attempted even when the capture fails.
    pub fn capture_and_install<R: ForeignRuntime + ?Sized>(
        &self,
        runtime: &R,
        endpoint: Endpoint,
        policy: Errhandler,
        report: &mut LifecycleReport,
    ) {
        if !self.saved(endpoint).is_null() {
            return;
        }

        let captured = runtime.comm_get_errhandler(endpoint);
        report.record(Step::CaptureErrhandler(endpoint), &captured);
        if let Ok(handler) = captured {
            *self.saved[endpoint.index()].lock() = handler;
        }

        let installed = runtime.comm_set_errhandler(endpoint, policy);
        report.record(Step::InstallErrhandler(endpoint), &installed);
    }

    /// Put the captured policy back on `endpoint` and drop our reference.
    ///
    /// Returns true when a captured handler was restored.
    pub fn restore<R: ForeignRuntime + ?Sized>(
        &self,
        runtime: &R,
        endpoint: Endpoint,
        report: &mut LifecycleReport,
    ) -> bool {
        let saved = std::mem::replace(&mut *self.saved[endpoint.index()].lock(), Errhandler::NULL);
        if saved.is_null() {
            return false;
        }

        let restored = runtime.comm_set_errhandler(endpoint, saved);
        report.record(Step::RestoreErrhandler(endpoint), &restored);
        let released = runtime.errhandler_free(saved);
        report.record(Step::ReleaseErrhandler(endpoint), &released);
        true
    }
}

impl Default for HandlerStore {
    fn default() -> Self {
        Self::new()
    }
}
