//! Bridge configuration.
//!
//! Read from the environment:
//! - `MPIBRIDGE_ERRORS`: `return` (default) installs the return-error-code
//!   policy on both endpoints; `fatal` installs abort-on-error.
//! - `MPIBRIDGE_FINALIZE_HOOK`: `on` (default) attaches the finalize hook to
//!   "self"; `off` leaves teardown to explicit CleanUp calls.
//! - `MPIBRIDGE_STRICT_STATUS`: `off` (default) makes CleanUp report success
//!   unconditionally; `on` reports the first failed step's code.
//! - `MPIBRIDGE_MATCHED_RECV`: `auto` (default), `on`, `off`.
//! - `MPIBRIDGE_LOG`: unset for no log, `stderr`, or a file path.

use std::path::PathBuf;

use crate::error::BridgeError;
use crate::handle::PredefinedErrhandler;

pub const ENV_ERRORS: &str = "MPIBRIDGE_ERRORS";
pub const ENV_FINALIZE_HOOK: &str = "MPIBRIDGE_FINALIZE_HOOK";
pub const ENV_STRICT_STATUS: &str = "MPIBRIDGE_STRICT_STATUS";
pub const ENV_MATCHED_RECV: &str = "MPIBRIDGE_MATCHED_RECV";
pub const ENV_LOG: &str = "MPIBRIDGE_LOG";

/// Policy StartUp installs on the predefined endpoints.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorPolicy {
    /// Failing calls return an error code.
    #[default]
    Return,
    /// Failing calls abort the job.
    Fatal,
}

impl ErrorPolicy {
    /// Parse from string (case-insensitive). Unknown values map to `Return`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "return" | "default" | "exception" | "errors_return" => Some(Self::Return),
            "fatal" | "abort" | "errors_are_fatal" => Some(Self::Fatal),
            _ => None,
        }
    }

    #[must_use]
    pub const fn predefined(self) -> PredefinedErrhandler {
        match self {
            Self::Return => PredefinedErrhandler::ErrorsReturn,
            Self::Fatal => PredefinedErrhandler::ErrorsAreFatal,
        }
    }
}

/// Whether matched probe/receive may be used.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchedRecv {
    /// Follow what the runtime advertises.
    #[default]
    Auto,
    On,
    Off,
}

impl MatchedRecv {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "default" => Some(Self::Auto),
            other => parse_bool(other).map(|on| if on { Self::On } else { Self::Off }),
        }
    }

    /// Final decision given the runtime's capability.
    ///
    /// Forcing `On` against a runtime without matched probe still yields
    /// false: the entry points do not exist.
    #[must_use]
    pub const fn resolve(self, runtime_supports: bool) -> bool {
        match self {
            Self::Auto | Self::On => runtime_supports,
            Self::Off => false,
        }
    }
}

/// Where lifecycle events are written.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Disabled,
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "0" | "off" | "none" => Self::Disabled,
            "stderr" | "-" => Self::Stderr,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub error_policy: ErrorPolicy,
    pub finalize_hook: bool,
    pub strict_status: bool,
    pub matched_recv: MatchedRecv,
    pub log: LogTarget,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::Return,
            finalize_hook: true,
            strict_status: false,
            matched_recv: MatchedRecv::Auto,
            log: LogTarget::Disabled,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "enabled" => Some(true),
        "0" | "off" | "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

impl BridgeConfig {
    /// Read the process environment. Unrecognized values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Lenient parse over an arbitrary lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            error_policy: lookup(ENV_ERRORS)
                .map(|v| ErrorPolicy::from_str_loose(&v))
                .unwrap_or(defaults.error_policy),
            finalize_hook: lookup(ENV_FINALIZE_HOOK)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.finalize_hook),
            strict_status: lookup(ENV_STRICT_STATUS)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.strict_status),
            matched_recv: lookup(ENV_MATCHED_RECV)
                .and_then(|v| MatchedRecv::parse(&v))
                .unwrap_or(defaults.matched_recv),
            log: lookup(ENV_LOG)
                .map(|v| LogTarget::parse(&v))
                .unwrap_or(defaults.log),
        }
    }

    /// Strict parse: unrecognized values are errors.
    pub fn try_from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, BridgeError> {
        fn invalid(key: &'static str, value: String) -> BridgeError {
            BridgeError::InvalidConfig { key, value }
        }

        let mut config = Self::default();
        if let Some(v) = lookup(ENV_ERRORS) {
            config.error_policy = ErrorPolicy::parse(&v).ok_or_else(|| invalid(ENV_ERRORS, v))?;
        }
        if let Some(v) = lookup(ENV_FINALIZE_HOOK) {
            config.finalize_hook = parse_bool(&v).ok_or_else(|| invalid(ENV_FINALIZE_HOOK, v))?;
        }
        if let Some(v) = lookup(ENV_STRICT_STATUS) {
            config.strict_status = parse_bool(&v).ok_or_else(|| invalid(ENV_STRICT_STATUS, v))?;
        }
        if let Some(v) = lookup(ENV_MATCHED_RECV) {
            config.matched_recv =
                MatchedRecv::parse(&v).ok_or_else(|| invalid(ENV_MATCHED_RECV, v))?;
        }
        if let Some(v) = lookup(ENV_LOG) {
            config.log = LogTarget::parse(&v);
        }
        Ok(config)
    }
}
