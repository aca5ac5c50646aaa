// Exports take raw pointers from the host binding; each documents what it
// dereferences.
#![allow(clippy::missing_safety_doc)]
//! # mpibridge-abi
//!
//! C ABI for the mpibridge lifecycle. Produces `libmpibridge.so`.
//!
//! ```text
//! host binding -> mpibridge_install_runtime(&vtable)
//!              -> mpibridge_startup()        (module import)
//!              -> mpibridge_cleanup()        (explicit, or from MPI_Finalize
//!                                             through the "self" attribute)
//! ```
//!
//! The binding supplies MPI through a [`ffi::MpiBridgeVtable`]; this crate
//! never links MPI itself.

#[macro_use]
mod macros;

mod config_cache;

pub mod bridge_state;
pub mod ffi;
pub mod lifecycle_abi;

pub use ffi::{MpiBridgeVtable, VtableRuntime};
pub use lifecycle_abi::*;
