//! # Interface Adapters
//!
//! The COM-callable objects SOS talks to. Each adapter is a plain struct
//! implementing [`ComClass`](crate::com::ComClass), a `create` function that
//! registers its vtables slot by slot, and one `unsafe extern "system"` thunk
//! per slot.
//!
//! ## Thunk shape
//!
//! Every thunk follows the same steps:
//!
//! 1. recover the adapter from the self pointer
//! 2. read native arguments (null-checked strings, caller buffers)
//! 3. mask addresses with the target's sign-extension mask
//! 4. delegate to a service
//! 5. write results through null-checked out-pointers, never past the
//!    caller-declared size, and return a status code
//!
//! Thunks run inside [`guard`], so a panic in a service becomes a logged
//! failure status instead of unwinding into native frames.
//!
//! ## Adapters
//!
//! - [`DataTargetWrapper`]: `ICLRDataTarget` family, handed to the DAC
//! - [`CorDebugDataTargetWrapper`]: `ICorDebugMutableDataTarget`, handed to DBI
//! - [`RuntimeWrapper`]: `IRuntime`, owns the DAC and DBI instances
//! - [`TargetWrapper`]: `ITarget`
//! - [`HostWrapper`]: `IHost`, the root passed to `SOSInitializeByHost`
//! - [`SymbolServiceWrapper`]: `ISymbolService`
//! - [`LldbServices`]: `ILLDBServices` + `ILLDBServices2`, the pointer every
//!   command export receives

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

mod access;
mod cache;
mod cordebug_data_target;
mod data_target;
mod handles;
mod host;
mod lldb_services;
mod metadata;
mod runtime;
mod symbol_service;
mod target;

pub use cache::CachedInterface;
pub use cordebug_data_target::CorDebugDataTargetWrapper;
pub use data_target::DataTargetWrapper;
pub use handles::HandleTable;
pub use host::{HostType, HostWrapper};
pub use lldb_services::LldbServices;
pub use runtime::{RuntimeConfiguration, RuntimeWrapper};
pub use symbol_service::SymbolServiceWrapper;
pub use target::TargetWrapper;

/// Run a slot body, turning a panic into `fallback`
///
/// Nothing may unwind across the native boundary; the panic is logged with
/// the slot name and the caller sees an ordinary failure.
pub(crate) fn guard<R>(slot: &'static str, fallback: R, body: impl FnOnce() -> R) -> R
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|text| (*text).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(slot, %message, "panic in interface slot");
            fallback
        }
    }
}

/// Signal a slot that must never be called in this host
///
/// Panics; the surrounding [`guard`] logs it and returns its fallback.
pub(crate) fn unsupported(slot: &'static str) -> !
{
    panic!("{} is not supported in this host", slot)
}
