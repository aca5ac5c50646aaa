//! Function table through which the host binding supplies MPI.
//!
//! The binding fills an [`MpiBridgeVtable`] with the real MPI entry points
//! and predefined handle values, then installs it. [`VtableRuntime`] turns
//! the table into a [`ForeignRuntime`] for the lifecycle manager.
//!
//! Handles are carried as `usize` so both integer (MPICH) and pointer
//! (Open MPI) handle representations fit.

use std::ffi::{c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};

use mpibridge_core::{
    AttrDeleteArgs, BridgeError, Endpoint, Errhandler, FinalizeHook, ForeignError, ForeignResult,
    ForeignRuntime, Keyval, PredefinedErrhandler, Primitive, STATUS_SUCCESS,
};

/// Status the trampoline returns when the hook panicked.
pub const TRAMPOLINE_PANIC_STATUS: c_int = -6;

pub type CommCopyAttrFn = unsafe extern "C" fn(
    oldcomm: usize,
    keyval: c_int,
    extra_state: *mut c_void,
    attr_val_in: *mut c_void,
    attr_val_out: *mut c_void,
    flag: *mut c_int,
) -> c_int;

pub type CommDeleteAttrFn = unsafe extern "C" fn(
    comm: usize,
    keyval: c_int,
    attr_val: *mut c_void,
    extra_state: *mut c_void,
) -> c_int;

pub type CommGetErrhandlerFn = unsafe extern "C" fn(comm: usize, errhandler: *mut usize) -> c_int;
pub type CommSetErrhandlerFn = unsafe extern "C" fn(comm: usize, errhandler: usize) -> c_int;
pub type ErrhandlerFreeFn = unsafe extern "C" fn(errhandler: *mut usize) -> c_int;
pub type CommCreateKeyvalFn = unsafe extern "C" fn(
    copy_fn: Option<CommCopyAttrFn>,
    delete_fn: Option<CommDeleteAttrFn>,
    keyval: *mut c_int,
    extra_state: *mut c_void,
) -> c_int;
pub type CommSetAttrFn = unsafe extern "C" fn(comm: usize, keyval: c_int, attr_val: *mut c_void) -> c_int;
pub type KeyvalFreeFn = unsafe extern "C" fn(keyval: *mut c_int) -> c_int;

/// MPI entry points and predefined handles, laid out for C.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MpiBridgeVtable {
    pub comm_world: usize,
    pub comm_self: usize,
    pub errors_are_fatal: usize,
    pub errors_return: usize,
    /// `MPI_ERRHANDLER_NULL`.
    pub errhandler_null: usize,
    /// `MPI_KEYVAL_INVALID`.
    pub keyval_invalid: c_int,
    /// Non-zero when `MPI_Mprobe`/`MPI_Mrecv` are usable.
    pub supports_matched_probe: c_int,
    /// `MPI_COMM_NULL_COPY_FN`; may be null where the library defines it so.
    pub null_copy_fn: Option<CommCopyAttrFn>,
    pub comm_get_errhandler: Option<CommGetErrhandlerFn>,
    pub comm_set_errhandler: Option<CommSetErrhandlerFn>,
    pub errhandler_free: Option<ErrhandlerFreeFn>,
    pub comm_create_keyval: Option<CommCreateKeyvalFn>,
    pub comm_set_attr: Option<CommSetAttrFn>,
    pub comm_free_keyval: Option<KeyvalFreeFn>,
    pub win_free_keyval: Option<KeyvalFreeFn>,
}

/// [`ForeignRuntime`] over a validated [`MpiBridgeVtable`].
#[derive(Debug, Clone, Copy)]
pub struct VtableRuntime {
    comm_world: usize,
    comm_self: usize,
    errors_are_fatal: usize,
    errors_return: usize,
    errhandler_null: usize,
    keyval_invalid: c_int,
    matched_probe: bool,
    null_copy_fn: Option<CommCopyAttrFn>,
    get_errhandler: CommGetErrhandlerFn,
    set_errhandler: CommSetErrhandlerFn,
    free_errhandler: ErrhandlerFreeFn,
    create_keyval: CommCreateKeyvalFn,
    set_attr: CommSetAttrFn,
    free_keyval: KeyvalFreeFn,
    free_win_keyval: KeyvalFreeFn,
}

impl VtableRuntime {
    /// Check that every entry point is present.
    pub fn new(table: &MpiBridgeVtable) -> Result<Self, BridgeError> {
        Ok(Self {
            comm_world: table.comm_world,
            comm_self: table.comm_self,
            errors_are_fatal: table.errors_are_fatal,
            errors_return: table.errors_return,
            errhandler_null: table.errhandler_null,
            keyval_invalid: table.keyval_invalid,
            matched_probe: table.supports_matched_probe != 0,
            null_copy_fn: table.null_copy_fn,
            get_errhandler: required(table.comm_get_errhandler, "comm_get_errhandler")?,
            set_errhandler: required(table.comm_set_errhandler, "comm_set_errhandler")?,
            free_errhandler: required(table.errhandler_free, "errhandler_free")?,
            create_keyval: required(table.comm_create_keyval, "comm_create_keyval")?,
            set_attr: required(table.comm_set_attr, "comm_set_attr")?,
            free_keyval: required(table.comm_free_keyval, "comm_free_keyval")?,
            free_win_keyval: required(table.win_free_keyval, "win_free_keyval")?,
        })
    }

    fn comm(&self, endpoint: Endpoint) -> usize {
        match endpoint {
            Endpoint::World => self.comm_world,
            Endpoint::SelfComm => self.comm_self,
        }
    }

    fn endpoint_of(&self, comm: usize) -> Option<Endpoint> {
        Endpoint::ALL.into_iter().find(|e| self.comm(*e) == comm)
    }

    /// Map the library's `MPI_KEYVAL_INVALID` onto [`Keyval::INVALID`].
    #[must_use]
    pub fn keyval_from_raw(&self, raw: c_int) -> Keyval {
        if raw == self.keyval_invalid {
            Keyval::INVALID
        } else {
            Keyval(raw)
        }
    }

    fn keyval_to_raw(&self, key: Keyval) -> c_int {
        if key.is_valid() { key.0 } else { self.keyval_invalid }
    }

    fn free_key(&self, f: KeyvalFreeFn, primitive: Primitive, key: Keyval) -> ForeignResult<()> {
        let mut raw = self.keyval_to_raw(key);
        // SAFETY: `raw` is a live local the callee may overwrite with the
        // invalid sentinel.
        check(primitive, unsafe { f(&mut raw) })
    }
}

fn required<F>(f: Option<F>, name: &'static str) -> Result<F, BridgeError> {
    f.ok_or(BridgeError::IncompleteRuntime(name))
}

fn check(primitive: Primitive, rc: c_int) -> ForeignResult<()> {
    if rc == STATUS_SUCCESS {
        Ok(())
    } else {
        Err(ForeignError::new(primitive, rc))
    }
}

impl ForeignRuntime for VtableRuntime {
    fn predefined_errhandler(&self, kind: PredefinedErrhandler) -> Errhandler {
        match kind {
            PredefinedErrhandler::ErrorsAreFatal => Errhandler(self.errors_are_fatal),
            PredefinedErrhandler::ErrorsReturn => Errhandler(self.errors_return),
        }
    }

    fn comm_get_errhandler(&self, endpoint: Endpoint) -> ForeignResult<Errhandler> {
        let mut raw = self.errhandler_null;
        // SAFETY: `raw` is a live local for the callee to write the handle into.
        check(Primitive::CommGetErrhandler, unsafe {
            (self.get_errhandler)(self.comm(endpoint), &mut raw)
        })?;
        if raw == self.errhandler_null {
            return Ok(Errhandler::NULL);
        }
        Ok(Errhandler(raw))
    }

    fn comm_set_errhandler(&self, endpoint: Endpoint, handler: Errhandler) -> ForeignResult<()> {
        let raw = if handler.is_null() {
            self.errhandler_null
        } else {
            handler.0
        };
        // SAFETY: plain value arguments.
        check(Primitive::CommSetErrhandler, unsafe {
            (self.set_errhandler)(self.comm(endpoint), raw)
        })
    }

    fn errhandler_free(&self, handler: Errhandler) -> ForeignResult<()> {
        let mut raw = handler.0;
        // SAFETY: `raw` is a live local the callee resets to the null handle.
        check(Primitive::ErrhandlerFree, unsafe { (self.free_errhandler)(&mut raw) })
    }

    fn comm_create_keyval(&self, hook: FinalizeHook) -> ForeignResult<Keyval> {
        // Ownership of the hook passes to the library as extra_state. It is
        // never reclaimed on success: the delete callback may fire after the
        // key itself is freed.
        let extra = Box::into_raw(Box::new(hook));
        let mut raw = self.keyval_invalid;
        // SAFETY: `raw` is a live local; `extra` stays valid for the life of
        // the process.
        let rc = unsafe {
            (self.create_keyval)(
                self.null_copy_fn,
                Some(attr_delete_trampoline),
                &mut raw,
                extra.cast::<c_void>(),
            )
        };
        let key = self.keyval_from_raw(raw);
        if rc != STATUS_SUCCESS || !key.is_valid() {
            // SAFETY: no key refers to `extra`, so the library can never
            // hand it back to the trampoline.
            drop(unsafe { Box::from_raw(extra) });
        }
        check(Primitive::CommCreateKeyval, rc)?;
        Ok(key)
    }

    fn comm_set_attr(&self, endpoint: Endpoint, keyval: Keyval) -> ForeignResult<()> {
        // SAFETY: nil payload; the library stores the pointer value only.
        check(Primitive::CommSetAttr, unsafe {
            (self.set_attr)(
                self.comm(endpoint),
                self.keyval_to_raw(keyval),
                std::ptr::null_mut(),
            )
        })
    }

    fn comm_free_keyval(&self, keyval: Keyval) -> ForeignResult<()> {
        self.free_key(self.free_keyval, Primitive::CommFreeKeyval, keyval)
    }

    fn win_free_keyval(&self, keyval: Keyval) -> ForeignResult<()> {
        self.free_key(self.free_win_keyval, Primitive::WinFreeKeyval, keyval)
    }

    fn supports_matched_probe(&self) -> bool {
        self.matched_probe
    }
}

/// Delete callback registered for the finalize key.
///
/// `extra_state` is the boxed [`FinalizeHook`] leaked by
/// [`VtableRuntime::comm_create_keyval`].
pub unsafe extern "C" fn attr_delete_trampoline(
    comm: usize,
    keyval: c_int,
    attr_val: *mut c_void,
    extra_state: *mut c_void,
) -> c_int {
    if extra_state.is_null() {
        return STATUS_SUCCESS;
    }
    // SAFETY: non-null extra_state is only ever the pointer we registered,
    // and it is never freed once the key exists.
    let hook = unsafe { &*extra_state.cast::<FinalizeHook>() };
    let endpoint = crate::bridge_state::runtime().and_then(|rt| rt.endpoint_of(comm));
    let args = AttrDeleteArgs {
        endpoint,
        keyval: Keyval(keyval),
        attr_value: attr_val as usize,
        extra_state: extra_state as usize,
    };
    catch_unwind(AssertUnwindSafe(|| hook.invoke(args))).unwrap_or(TRAMPOLINE_PANIC_STATUS)
}
