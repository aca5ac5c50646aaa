//! Verification harness for the mpibridge lifecycle.
//!
//! Drives every shutdown path against the simulated runtime, checks the
//! lifecycle invariants, and produces a JSON report with the JSONL event log
//! pinned by hash.

#![forbid(unsafe_code)]

pub mod report;
pub mod scenarios;

use thiserror::Error;

pub use report::{ArtifactRef, HarnessReport};
pub use scenarios::{Check, ScenarioOutcome, ShutdownPath, run_all, run_scenario};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown shutdown path {0:?} (expected explicit, finalize, exit, degraded, all)")]
    UnknownPath(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bridge(#[from] mpibridge_core::BridgeError),
    #[error("invalid log: {0}")]
    LogValidation(String),
}
