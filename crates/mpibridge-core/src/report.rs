//! Composite outcome of a lifecycle transition.
//!
//! Every primitive call made during StartUp or CleanUp is recorded as a
//! [`StepRecord`]. Failures never abort the transition; they are collected
//! here so callers can log or inspect them.

use serde::{Deserialize, Serialize};

use crate::error::ForeignError;
use crate::handle::{Endpoint, STATUS_SUCCESS};

/// Which lifecycle entry point produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    StartUp,
    CleanUp,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartUp => "startup",
            Self::CleanUp => "cleanup",
        }
    }
}

/// What the call did to the lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// This call performed the transition.
    Performed,
    /// An earlier call already performed it.
    AlreadyDone,
    /// CleanUp before any StartUp: nothing was captured.
    NotStarted,
    /// Another call is mid-transition (re-entrant or concurrent).
    InProgress,
}

/// Individual step attempted during a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "endpoint")]
pub enum Step {
    CaptureErrhandler(Endpoint),
    InstallErrhandler(Endpoint),
    CreateFinalizeKey,
    AttachFinalizeKey,
    FreeFinalizeKey,
    FreeWindowKey,
    RestoreErrhandler(Endpoint),
    ReleaseErrhandler(Endpoint),
}

impl Step {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CaptureErrhandler(_) => "capture_errhandler",
            Self::InstallErrhandler(_) => "install_errhandler",
            Self::CreateFinalizeKey => "create_finalize_key",
            Self::AttachFinalizeKey => "attach_finalize_key",
            Self::FreeFinalizeKey => "free_finalize_key",
            Self::FreeWindowKey => "free_window_key",
            Self::RestoreErrhandler(_) => "restore_errhandler",
            Self::ReleaseErrhandler(_) => "release_errhandler",
        }
    }

    #[must_use]
    pub const fn endpoint(self) -> Option<Endpoint> {
        match self {
            Self::CaptureErrhandler(e)
            | Self::InstallErrhandler(e)
            | Self::RestoreErrhandler(e)
            | Self::ReleaseErrhandler(e) => Some(e),
            Self::AttachFinalizeKey => Some(Endpoint::SelfComm),
            Self::CreateFinalizeKey | Self::FreeFinalizeKey | Self::FreeWindowKey => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ForeignError>,
}

impl StepRecord {
    #[must_use]
    pub fn from_result<T>(step: Step, result: &Result<T, ForeignError>) -> Self {
        Self {
            step,
            error: result.as_ref().err().copied(),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub operation: Operation,
    pub transition: Transition,
    pub steps: Vec<StepRecord>,
}

impl LifecycleReport {
    #[must_use]
    pub fn new(operation: Operation, transition: Transition) -> Self {
        Self {
            operation,
            transition,
            steps: Vec::new(),
        }
    }

    pub(crate) fn record<T>(&mut self, step: Step, result: &Result<T, ForeignError>) {
        self.steps.push(StepRecord::from_result(step, result));
    }

    #[must_use]
    pub fn performed(&self) -> bool {
        self.transition == Transition::Performed
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.is_ok())
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(StepRecord::is_ok)
    }

    /// Status handed back to the foreign runtime.
    ///
    /// Success unless `strict` is set, in which case the first failed step's
    /// code is reported.
    #[must_use]
    pub fn status_code(&self, strict: bool) -> i32 {
        if !strict {
            return STATUS_SUCCESS;
        }
        self.failures()
            .find_map(|s| s.error.map(|e| e.code))
            .unwrap_or(STATUS_SUCCESS)
    }
}
