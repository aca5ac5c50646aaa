//! In-memory model of the foreign runtime.
//!
//! Models the parts of the runtime the lifecycle touches:
//! - predefined `ERRORS_ARE_FATAL` / `ERRORS_RETURN` handlers, with every
//!   reference obtained through `comm_get_errhandler` tracked so leaks and
//!   double frees are visible;
//! - communicator keyvals with deferred free: a freed keyval whose attribute
//!   is still attached keeps its delete callback until the attribute goes;
//! - `finalize`, which deletes the "self" attributes in reverse order of
//!   attachment and runs their callbacks with no internal lock held;
//! - one-shot and sticky fault injection per primitive, plus a call journal.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::error::{ForeignError, ForeignResult, Primitive};
use crate::handle::{Endpoint, Errhandler, Keyval, PredefinedErrhandler};
use crate::runtime::{AttrDeleteArgs, FinalizeHook, ForeignRuntime};

pub const ERRORS_ARE_FATAL: Errhandler = Errhandler(1);
pub const ERRORS_RETURN: Errhandler = Errhandler(2);

pub const ERR_COMM: i32 = 5;
pub const ERR_ARG: i32 = 12;
pub const ERR_OTHER: i32 = 15;
pub const ERR_KEYVAL: i32 = 48;

/// Journal entry for every primitive call, recorded before fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    GetErrhandler(Endpoint),
    SetErrhandler(Endpoint, Errhandler),
    FreeErrhandler(Errhandler),
    CreateKeyval,
    SetAttr(Endpoint, Keyval),
    FreeKeyval(Keyval),
    WinFreeKeyval(Keyval),
    /// The runtime fired a delete callback.
    AttrDelete(Endpoint, Keyval),
    Finalize,
}

/// Result of an operation that hits an internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    /// The caller got an error code back.
    Returned(i32),
    /// The installed policy would have aborted the job.
    Aborted(i32),
}

struct KeyvalEntry {
    hook: FinalizeHook,
    freed: bool,
}

struct State {
    current: [Errhandler; 2],
    user_refs: HashMap<Errhandler, u32>,
    next_handler: usize,
    keyvals: BTreeMap<i32, KeyvalEntry>,
    win_keyvals: BTreeMap<i32, bool>,
    next_keyval: i32,
    attrs: [Vec<Keyval>; 2],
    one_shot: Vec<(Primitive, i32)>,
    sticky: HashMap<Primitive, i32>,
    calls: Vec<Call>,
    finalized: bool,
}

impl State {
    fn fault(&mut self, primitive: Primitive) -> ForeignResult<()> {
        if let Some(pos) = self.one_shot.iter().position(|(p, _)| *p == primitive) {
            let (_, code) = self.one_shot.remove(pos);
            return Err(ForeignError::new(primitive, code));
        }
        if let Some(code) = self.sticky.get(&primitive) {
            return Err(ForeignError::new(primitive, *code));
        }
        if self.finalized {
            return Err(ForeignError::new(primitive, ERR_OTHER));
        }
        Ok(())
    }

    fn live_keyval(&self, keyval: Keyval) -> bool {
        self.keyvals.get(&keyval.0).is_some_and(|k| !k.freed)
    }

    fn attached_anywhere(&self, keyval: Keyval) -> bool {
        self.attrs.iter().any(|list| list.contains(&keyval))
    }

    fn reap_keyval(&mut self, keyval: Keyval) {
        if self.keyvals.get(&keyval.0).is_some_and(|k| k.freed) && !self.attached_anywhere(keyval)
        {
            self.keyvals.remove(&keyval.0);
        }
    }
}

pub struct SimRuntime {
    state: Mutex<State>,
    matched_probe: bool,
}

impl SimRuntime {
    /// Fresh runtime: both endpoints abort on error.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current: [ERRORS_ARE_FATAL, ERRORS_ARE_FATAL],
                user_refs: HashMap::new(),
                next_handler: 100,
                keyvals: BTreeMap::new(),
                win_keyvals: BTreeMap::new(),
                next_keyval: 10,
                attrs: [Vec::new(), Vec::new()],
                one_shot: Vec::new(),
                sticky: HashMap::new(),
                calls: Vec::new(),
                finalized: false,
            }),
            matched_probe: true,
        }
    }

    #[must_use]
    pub fn with_matched_probe(mut self, supported: bool) -> Self {
        self.matched_probe = supported;
        self
    }

    /// Fail the next call of `primitive` with `code`.
    pub fn fail_next(&self, primitive: Primitive, code: i32) {
        self.state.lock().one_shot.push((primitive, code));
    }

    /// Fail every call of `primitive` with `code` until cleared.
    pub fn fail_always(&self, primitive: Primitive, code: i32) {
        self.state.lock().sticky.insert(primitive, code);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.one_shot.clear();
        state.sticky.clear();
    }

    /// Create a user-defined handler (returns error codes) and install it on
    /// `endpoint`, as application code would before the bridge starts.
    pub fn install_user_errhandler(&self, endpoint: Endpoint) -> Errhandler {
        let mut state = self.state.lock();
        let handler = Errhandler(state.next_handler);
        state.next_handler += 1;
        state.current[endpoint.index()] = handler;
        handler
    }

    /// Allocate a window keyval, as the memory-window component would.
    pub fn win_create_keyval(&self) -> Keyval {
        let mut state = self.state.lock();
        let key = Keyval(state.next_keyval);
        state.next_keyval += 1;
        state.win_keyvals.insert(key.0, false);
        key
    }

    #[must_use]
    pub fn current_errhandler(&self, endpoint: Endpoint) -> Errhandler {
        self.state.lock().current[endpoint.index()]
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    #[must_use]
    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    #[must_use]
    pub fn attr_attached(&self, endpoint: Endpoint, keyval: Keyval) -> bool {
        self.state.lock().attrs[endpoint.index()].contains(&keyval)
    }

    /// Keyval still allocated and not freed by its owner.
    #[must_use]
    pub fn keyval_live(&self, keyval: Keyval) -> bool {
        self.state.lock().live_keyval(keyval)
    }

    #[must_use]
    pub fn win_keyval_live(&self, keyval: Keyval) -> bool {
        self.state.lock().win_keyvals.get(&keyval.0) == Some(&false)
    }

    /// Handler references handed out by `comm_get_errhandler` and not yet freed.
    #[must_use]
    pub fn outstanding_errhandler_refs(&self) -> u32 {
        self.state.lock().user_refs.values().sum()
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    /// Run an operation that fails internally on `endpoint`.
    #[must_use]
    pub fn invoke_failing_operation(&self, endpoint: Endpoint) -> SimOutcome {
        if self.current_errhandler(endpoint) == ERRORS_ARE_FATAL {
            SimOutcome::Aborted(ERR_OTHER)
        } else {
            SimOutcome::Returned(ERR_OTHER)
        }
    }

    /// Finalize the runtime: delete "self" attributes newest first, firing
    /// their callbacks, then shut down. Returns each callback's status, or
    /// `None` when already finalized.
    pub fn finalize(&self) -> Option<Vec<i32>> {
        let pending: Vec<(Keyval, FinalizeHook)> = {
            let mut state = self.state.lock();
            state.calls.push(Call::Finalize);
            if state.finalized {
                return None;
            }
            let attached = std::mem::take(&mut state.attrs[Endpoint::SelfComm.index()]);
            attached
                .into_iter()
                .rev()
                .filter_map(|key| state.keyvals.get(&key.0).map(|k| (key, k.hook.clone())))
                .collect()
        };

        let mut statuses = Vec::with_capacity(pending.len());
        for (key, hook) in pending {
            self.state
                .lock()
                .calls
                .push(Call::AttrDelete(Endpoint::SelfComm, key));
            statuses.push(hook.invoke(AttrDeleteArgs {
                endpoint: Some(Endpoint::SelfComm),
                keyval: key,
                attr_value: 0,
                extra_state: 0,
            }));
            self.state.lock().reap_keyval(key);
        }

        self.state.lock().finalized = true;
        Some(statuses)
    }
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ForeignRuntime for SimRuntime {
    fn predefined_errhandler(&self, kind: PredefinedErrhandler) -> Errhandler {
        match kind {
            PredefinedErrhandler::ErrorsAreFatal => ERRORS_ARE_FATAL,
            PredefinedErrhandler::ErrorsReturn => ERRORS_RETURN,
        }
    }

    fn comm_get_errhandler(&self, endpoint: Endpoint) -> ForeignResult<Errhandler> {
        let mut state = self.state.lock();
        state.calls.push(Call::GetErrhandler(endpoint));
        state.fault(Primitive::CommGetErrhandler)?;
        let handler = state.current[endpoint.index()];
        *state.user_refs.entry(handler).or_insert(0) += 1;
        Ok(handler)
    }

    fn comm_set_errhandler(&self, endpoint: Endpoint, handler: Errhandler) -> ForeignResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetErrhandler(endpoint, handler));
        state.fault(Primitive::CommSetErrhandler)?;
        if handler.is_null() {
            return Err(ForeignError::new(Primitive::CommSetErrhandler, ERR_ARG));
        }
        state.current[endpoint.index()] = handler;
        Ok(())
    }

    fn errhandler_free(&self, handler: Errhandler) -> ForeignResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::FreeErrhandler(handler));
        state.fault(Primitive::ErrhandlerFree)?;
        match state.user_refs.get_mut(&handler) {
            Some(refs) if *refs > 0 => {
                *refs -= 1;
                Ok(())
            }
            _ => Err(ForeignError::new(Primitive::ErrhandlerFree, ERR_ARG)),
        }
    }

    fn comm_create_keyval(&self, hook: FinalizeHook) -> ForeignResult<Keyval> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateKeyval);
        state.fault(Primitive::CommCreateKeyval)?;
        let key = Keyval(state.next_keyval);
        state.next_keyval += 1;
        state.keyvals.insert(key.0, KeyvalEntry { hook, freed: false });
        Ok(key)
    }

    fn comm_set_attr(&self, endpoint: Endpoint, keyval: Keyval) -> ForeignResult<()> {
        let replaced = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.calls.push(Call::SetAttr(endpoint, keyval));
            state.fault(Primitive::CommSetAttr)?;
            if !state.live_keyval(keyval) {
                return Err(ForeignError::new(Primitive::CommSetAttr, ERR_KEYVAL));
            }
            let list = &mut state.attrs[endpoint.index()];
            if list.contains(&keyval) {
                state.keyvals.get(&keyval.0).map(|k| k.hook.clone())
            } else {
                list.push(keyval);
                None
            }
        };

        // Replacing a value deletes the old one first.
        if let Some(hook) = replaced {
            self.state.lock().calls.push(Call::AttrDelete(endpoint, keyval));
            hook.invoke(AttrDeleteArgs {
                endpoint: Some(endpoint),
                keyval,
                attr_value: 0,
                extra_state: 0,
            });
        }
        Ok(())
    }

    fn comm_free_keyval(&self, keyval: Keyval) -> ForeignResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::FreeKeyval(keyval));
        state.fault(Primitive::CommFreeKeyval)?;
        if !state.live_keyval(keyval) {
            return Err(ForeignError::new(Primitive::CommFreeKeyval, ERR_KEYVAL));
        }
        if let Some(entry) = state.keyvals.get_mut(&keyval.0) {
            entry.freed = true;
        }
        state.reap_keyval(keyval);
        Ok(())
    }

    fn win_free_keyval(&self, keyval: Keyval) -> ForeignResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WinFreeKeyval(keyval));
        state.fault(Primitive::WinFreeKeyval)?;
        match state.win_keyvals.get_mut(&keyval.0) {
            Some(freed) if !*freed => {
                *freed = true;
                Ok(())
            }
            _ => Err(ForeignError::new(Primitive::WinFreeKeyval, ERR_KEYVAL)),
        }
    }

    fn supports_matched_probe(&self) -> bool {
        self.matched_probe
    }
}
