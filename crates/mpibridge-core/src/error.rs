//! Error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Foreign runtime entry points the bridge calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    CommGetErrhandler,
    CommSetErrhandler,
    ErrhandlerFree,
    CommCreateKeyval,
    CommSetAttr,
    CommFreeKeyval,
    WinFreeKeyval,
}

impl Primitive {
    pub const ALL: [Primitive; 7] = [
        Primitive::CommGetErrhandler,
        Primitive::CommSetErrhandler,
        Primitive::ErrhandlerFree,
        Primitive::CommCreateKeyval,
        Primitive::CommSetAttr,
        Primitive::CommFreeKeyval,
        Primitive::WinFreeKeyval,
    ];

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::CommGetErrhandler => "MPI_Comm_get_errhandler",
            Self::CommSetErrhandler => "MPI_Comm_set_errhandler",
            Self::ErrhandlerFree => "MPI_Errhandler_free",
            Self::CommCreateKeyval => "MPI_Comm_create_keyval",
            Self::CommSetAttr => "MPI_Comm_set_attr",
            Self::CommFreeKeyval => "MPI_Comm_free_keyval",
            Self::WinFreeKeyval => "MPI_Win_free_keyval",
        }
    }
}

/// A foreign primitive returned a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{} returned status {code}", primitive.symbol())]
pub struct ForeignError {
    pub primitive: Primitive,
    pub code: i32,
}

impl ForeignError {
    #[must_use]
    pub const fn new(primitive: Primitive, code: i32) -> Self {
        Self { primitive, code }
    }
}

pub type ForeignResult<T> = Result<T, ForeignError>;

/// Errors raised by the bridge itself, outside the lifecycle transitions.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },
    #[error("log sink: {0}")]
    Log(#[from] std::io::Error),
    #[error("log serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no foreign runtime installed")]
    RuntimeNotInstalled,
    #[error("a foreign runtime is already installed")]
    RuntimeAlreadyInstalled,
    #[error("lifecycle is started and not cleaned up")]
    LifecycleActive,
    #[error("this process already cleaned up; MPI cannot be restarted")]
    LifecycleRetired,
    #[error("foreign runtime table is incomplete: missing {0}")]
    IncompleteRuntime(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_error_names_the_symbol() {
        let err = ForeignError::new(Primitive::CommCreateKeyval, 13);
        assert_eq!(err.to_string(), "MPI_Comm_create_keyval returned status 13");
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::InvalidConfig {
            key: "MPIBRIDGE_FINALIZE_HOOK",
            value: "maybe".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"maybe\" for MPIBRIDGE_FINALIZE_HOOK"
        );
    }
}
