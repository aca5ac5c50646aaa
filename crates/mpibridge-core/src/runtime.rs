//! Seam between the lifecycle manager and the foreign messaging runtime.
//!
//! Implementations forward each method to the matching runtime entry point
//! (see [`Primitive::symbol`](crate::Primitive::symbol)) and translate any
//! non-success status into a [`ForeignError`](crate::ForeignError).

use std::sync::Arc;

use crate::error::ForeignResult;
use crate::handle::{Endpoint, Errhandler, Keyval, PredefinedErrhandler};

/// Arguments the runtime passes to an attribute delete callback.
///
/// The lifecycle hook ignores all of them; they are carried so adapters can
/// log what the runtime handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrDeleteArgs {
    pub endpoint: Option<Endpoint>,
    pub keyval: Keyval,
    pub attr_value: usize,
    pub extra_state: usize,
}

impl AttrDeleteArgs {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            endpoint: None,
            keyval: Keyval::INVALID,
            attr_value: 0,
            extra_state: 0,
        }
    }
}

/// Destructor registered with an attribute key.
///
/// Runs synchronously on whichever thread finalizes the runtime and returns
/// the status code the runtime should see.
#[derive(Clone)]
pub struct FinalizeHook(Arc<dyn Fn(AttrDeleteArgs) -> i32 + Send + Sync>);

impl FinalizeHook {
    pub fn new(f: impl Fn(AttrDeleteArgs) -> i32 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, args: AttrDeleteArgs) -> i32 {
        (self.0)(args)
    }
}

impl std::fmt::Debug for FinalizeHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FinalizeHook(..)")
    }
}

/// Foreign runtime primitives consumed by the bridge.
pub trait ForeignRuntime: Send + Sync {
    /// Handle of a predefined policy. Never fails.
    fn predefined_errhandler(&self, kind: PredefinedErrhandler) -> Errhandler;

    /// Current policy of `endpoint`; the caller owns one reference to it.
    fn comm_get_errhandler(&self, endpoint: Endpoint) -> ForeignResult<Errhandler>;

    fn comm_set_errhandler(&self, endpoint: Endpoint, handler: Errhandler) -> ForeignResult<()>;

    /// Drop one reference to `handler`.
    fn errhandler_free(&self, handler: Errhandler) -> ForeignResult<()>;

    /// Allocate a communicator attribute key with a null copy callback and
    /// `hook` as its delete callback.
    fn comm_create_keyval(&self, hook: FinalizeHook) -> ForeignResult<Keyval>;

    /// Attach `keyval` to `endpoint` with a nil payload.
    fn comm_set_attr(&self, endpoint: Endpoint, keyval: Keyval) -> ForeignResult<()>;

    fn comm_free_keyval(&self, keyval: Keyval) -> ForeignResult<()>;

    fn win_free_keyval(&self, keyval: Keyval) -> ForeignResult<()>;

    /// Whether matched probe/receive entry points are available.
    fn supports_matched_probe(&self) -> bool {
        true
    }
}

impl<R: ForeignRuntime + ?Sized> ForeignRuntime for Arc<R> {
    fn predefined_errhandler(&self, kind: PredefinedErrhandler) -> Errhandler {
        (**self).predefined_errhandler(kind)
    }

    fn comm_get_errhandler(&self, endpoint: Endpoint) -> ForeignResult<Errhandler> {
        (**self).comm_get_errhandler(endpoint)
    }

    fn comm_set_errhandler(&self, endpoint: Endpoint, handler: Errhandler) -> ForeignResult<()> {
        (**self).comm_set_errhandler(endpoint, handler)
    }

    fn errhandler_free(&self, handler: Errhandler) -> ForeignResult<()> {
        (**self).errhandler_free(handler)
    }

    fn comm_create_keyval(&self, hook: FinalizeHook) -> ForeignResult<Keyval> {
        (**self).comm_create_keyval(hook)
    }

    fn comm_set_attr(&self, endpoint: Endpoint, keyval: Keyval) -> ForeignResult<()> {
        (**self).comm_set_attr(endpoint, keyval)
    }

    fn comm_free_keyval(&self, keyval: Keyval) -> ForeignResult<()> {
        (**self).comm_free_keyval(keyval)
    }

    fn win_free_keyval(&self, keyval: Keyval) -> ForeignResult<()> {
        (**self).win_free_keyval(keyval)
    }

    fn supports_matched_probe(&self) -> bool {
        (**self).supports_matched_probe()
    }
}
