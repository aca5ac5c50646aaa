//! Opaque handles exchanged with the foreign runtime.
//!
//! The bridge never interprets handle values; it only compares them against
//! their sentinels and hands them back to the runtime that produced them.

use serde::{Deserialize, Serialize};

/// Status code the foreign runtime uses for success.
pub const STATUS_SUCCESS: i32 = 0;

/// One of the two predefined communicators whose state the bridge manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// All processes of the job.
    World,
    /// The calling process alone. Finalize destroys its attributes first.
    #[serde(rename = "self")]
    SelfComm,
}

impl Endpoint {
    /// Both endpoints in capture order.
    pub const ALL: [Endpoint; 2] = [Endpoint::World, Endpoint::SelfComm];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::World => "world",
            Self::SelfComm => "self",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::World => 0,
            Self::SelfComm => 1,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque error-handler handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Errhandler(pub usize);

impl Errhandler {
    /// "No handler captured."
    pub const NULL: Errhandler = Errhandler(0);

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

/// Predefined error-handling policies every runtime provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredefinedErrhandler {
    /// Abort the job on error.
    ErrorsAreFatal,
    /// Return an error code to the caller.
    ErrorsReturn,
}

impl PredefinedErrhandler {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ErrorsAreFatal => "errors_are_fatal",
            Self::ErrorsReturn => "errors_return",
        }
    }
}

/// Opaque attribute key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keyval(pub i32);

impl Keyval {
    /// Key that was never allocated or has been freed.
    pub const INVALID: Keyval = Keyval(-1);

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for Keyval {
    fn default() -> Self {
        Self::INVALID
    }
}
