//! Startup/cleanup lifecycle for the messaging bridge's global state.
//!
//! The bridge touches two pieces of global runtime state: the error-handling
//! policy of the predefined "world" and "self" endpoints, and an attribute
//! key whose delete callback runs during runtime finalize. This crate owns
//! both, guaranteeing that:
//! - StartUp captures the previous policy of each endpoint and installs the
//!   configured one (return-error-codes by default);
//! - the finalize hook on "self" makes CleanUp run before the runtime shuts
//!   down, even when the host never calls it;
//! - CleanUp releases owned keys, then restores and releases the captured
//!   policies, and runs at most once no matter how many paths reach it.
//!
//! # Architecture
//!
//! - **Handles** (`handle`): endpoints, policy handles, attribute keys
//! - **Runtime seam** (`runtime`): [`ForeignRuntime`] primitives
//! - **Handler store** (`handler_store`): captured policies per endpoint
//! - **Hook registry** (`hook_registry`): finalize key and window key
//! - **Lifecycle** (`lifecycle`): the once-only phase machine
//! - **Reports** (`report`): per-step outcome of each transition
//! - **Configuration** (`config`): environment-driven behavior
//! - **Metrics** (`metrics`): atomic counters for observability
//! - **Structured log** (`structured_log`): JSONL event records
//! - **Simulator** (`sim`): in-memory runtime for tests and the harness

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handle;
pub mod handler_store;
pub mod hook_registry;
pub mod lifecycle;
pub mod metrics;
pub mod report;
pub mod runtime;
pub mod sim;
pub mod structured_log;

pub use config::{BridgeConfig, ErrorPolicy, LogTarget, MatchedRecv};
pub use error::{BridgeError, ForeignError, ForeignResult, Primitive};
pub use handle::{Endpoint, Errhandler, Keyval, PredefinedErrhandler, STATUS_SUCCESS};
pub use lifecycle::{LifecycleManager, LifecyclePhase, WindowKeyAdoption};
pub use metrics::{LifecycleMetrics, MetricsSnapshot};
pub use report::{LifecycleReport, Operation, Step, StepRecord, Transition};
pub use runtime::{AttrDeleteArgs, FinalizeHook, ForeignRuntime};
pub use sim::SimRuntime;
pub use structured_log::{LogEmitter, LogEntry, LogLevel};
