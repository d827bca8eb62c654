//! # COM bridge
//!
//! The minimal subset of COM needed to expose Rust objects to a native
//! plugin: interface identifiers, status codes, vtables built at runtime and
//! a reference-counted object identity implementing `IUnknown`.
//!
//! This is not a COM runtime. There is no apartment model, no marshaling
//! across processes and no class factory; objects are created directly by
//! the host and handed to the plugin as raw interface pointers.
//!
//! ## Example
//!
//! ```rust
//! use std::ffi::c_void;
//!
//! use soshost_core::com::{ComClass, ComObjectBuilder, HResult};
//! use soshost_core::declare_interface;
//!
//! declare_interface! {
//!     static ICOUNTER: "ICounter" = 0x7d1f3b8e_2c4a_4b6e_9f10_5a7c8e9d0b21 {
//!         Get,
//!     }
//! }
//!
//! struct Counter(u32);
//!
//! impl ComClass for Counter {}
//!
//! type Get = unsafe extern "system" fn(this: *mut c_void, value: *mut u32) -> HResult;
//!
//! unsafe extern "system" fn get(this: *mut c_void, value: *mut u32) -> HResult
//! {
//!     let counter = soshost_core::com::ComObject::<Counter>::from_this(this);
//!     *value = counter.0;
//!     HResult::S_OK
//! }
//!
//! let mut builder = ComObjectBuilder::new(Counter(42));
//! let mut vtable = builder.add_interface(&ICOUNTER, true);
//! vtable.add_method(get as Get);
//! let interface = vtable.complete()?;
//! let counter = builder.finish();
//! assert_eq!(counter.ref_count(), 1);
//! assert!(!interface.is_null());
//! # Ok::<(), soshost_core::com::ComError>(())
//! ```

mod com_ref;
mod descriptor;
mod guid;
mod hresult;
pub mod marshal;
mod object;
mod vtable;

pub use com_ref::{release, ComRef};
pub use descriptor::{InterfaceDescriptor, IUNKNOWN_SLOTS};
pub use guid::Guid;
pub use hresult::HResult;
pub use object::{ComClass, ComObject, ComObjectBuilder};
use thiserror::Error;
pub use vtable::{NativeMethod, Slot, VTableBuilder};

crate::declare_interface! {
    /// `IUnknown`, registered on every object
    pub static IUNKNOWN: "IUnknown" = 0x00000000_0000_0000_c000_000000000046 {}
}

/// Protocol errors raised while building or querying objects
///
/// These indicate a programming error in an adapter, not a runtime
/// condition of the target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComError
{
    /// A validated vtable did not receive exactly the declared number of slots
    #[error("{interface}: expected {expected} slots, {actual} were added")]
    SlotCountMismatch
    {
        /// Interface being built
        interface: &'static str,
        /// Slots declared by the descriptor (excluding `IUnknown`)
        expected: usize,
        /// Slots actually added
        actual: usize,
    },

    /// The interface was already registered on this object
    #[error("interface {0} registered twice on the same object")]
    DuplicateInterface(&'static str),

    /// `QueryInterface` found no vtable for the IID
    #[error("no such interface: {0}")]
    NoInterface(Guid),

    /// A native call returned a null interface pointer
    #[error("null interface pointer")]
    NullPointer,
}
