//! # Vtable Builder
//!
//! Builds one native function-pointer table per interface. Methods are
//! appended strictly in native slot order; the table is materialised into an
//! immutable boxed slice by [`VTableBuilder::complete`].
//!
//! ## Slot signatures
//!
//! Only `unsafe extern "system" fn(*mut c_void, ...) -> R` pointers implement
//! [`NativeMethod`], so a method that forgets the leading self pointer or uses
//! the Rust calling convention does not compile. Adapters declare one type
//! alias per slot and cast their functions to it:
//!
//! ```rust,ignore
//! type GetPointerSize = unsafe extern "system" fn(this: *mut c_void, size: *mut u32) -> HResult;
//!
//! builder.add_method(get_pointer_size as GetPointerSize);
//! ```

use std::ffi::c_void;

use tracing::trace;

use super::object::Identity;
use super::{ComError, InterfaceDescriptor};

/// One vtable entry
pub type Slot = *const c_void;

/// A function pointer that may occupy a vtable slot
///
/// Implemented for `unsafe extern "system"` function pointers whose first
/// parameter is the native self pointer, for up to twelve further arguments.
pub trait NativeMethod: Copy
{
    /// Erase the pointer to a slot entry
    fn into_slot(self) -> Slot;
}

macro_rules! impl_native_method {
    ($($arg:ident),*) => {
        impl<R, $($arg),*> NativeMethod for unsafe extern "system" fn(*mut c_void $(, $arg)*) -> R
        {
            fn into_slot(self) -> Slot
            {
                self as Slot
            }
        }
    };
}

impl_native_method!();
impl_native_method!(A1);
impl_native_method!(A1, A2);
impl_native_method!(A1, A2, A3);
impl_native_method!(A1, A2, A3, A4);
impl_native_method!(A1, A2, A3, A4, A5);
impl_native_method!(A1, A2, A3, A4, A5, A6);
impl_native_method!(A1, A2, A3, A4, A5, A6, A7);
impl_native_method!(A1, A2, A3, A4, A5, A6, A7, A8);
impl_native_method!(A1, A2, A3, A4, A5, A6, A7, A8, A9);
impl_native_method!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
impl_native_method!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);
impl_native_method!(A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11, A12);

/// Builder for one interface's vtable on an object under construction
///
/// Obtained from [`ComObjectBuilder::add_interface`](super::ComObjectBuilder::add_interface).
/// The `IUnknown` slots are prepended automatically; callers add everything
/// after them, base interface slots first.
pub struct VTableBuilder<'a>
{
    identity: &'a mut Identity,
    descriptor: &'static InterfaceDescriptor,
    validate: bool,
    slots: Vec<Slot>,
}

impl<'a> VTableBuilder<'a>
{
    pub(crate) fn new(identity: &'a mut Identity, descriptor: &'static InterfaceDescriptor, validate: bool) -> Self
    {
        Self {
            identity,
            descriptor,
            validate,
            slots: Vec::with_capacity(descriptor.slot_count()),
        }
    }

    /// Append the next slot
    pub fn add_method<M: NativeMethod>(&mut self, method: M) -> &mut Self
    {
        self.slots.push(method.into_slot());
        self
    }

    /// Number of slots added so far (excluding `IUnknown`)
    pub fn len(&self) -> usize
    {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.slots.is_empty()
    }

    /// The interface being built
    pub fn descriptor(&self) -> &'static InterfaceDescriptor
    {
        self.descriptor
    }

    /// Freeze the vtable and register it on the object
    ///
    /// Returns the interface pointer native code uses as `this`. The pointer
    /// is borrowed from the object; no reference is added.
    ///
    /// ## Errors
    ///
    /// - `SlotCountMismatch`: `validate` was requested and the number of
    ///   added slots differs from the descriptor
    /// - `DuplicateInterface`: the IID is already registered on this object
    pub fn complete(self) -> Result<*mut c_void, ComError>
    {
        let expected = self.descriptor.slot_count();
        if self.validate && self.slots.len() != expected {
            return Err(ComError::SlotCountMismatch {
                interface: self.descriptor.name,
                expected,
                actual: self.slots.len(),
            });
        }

        trace!(interface = self.descriptor.name, slots = self.slots.len(), "vtable complete");
        self.identity.register(self.descriptor.iid, self.descriptor.name, self.slots)
    }
}
