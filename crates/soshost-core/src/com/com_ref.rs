//! Owned references to arbitrary COM interface pointers.
//!
//! Used for pointers that come back from native code (DAC/DBI instances) and
//! for exercising our own objects through their vtables exactly the way a
//! native caller would.

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};

use super::{Guid, HResult};

/// The three leading slots of every vtable
#[repr(C)]
struct IUnknownVtbl
{
    query_interface: unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    release: unsafe extern "system" fn(*mut c_void) -> u32,
}

/// One owned reference to a COM interface pointer
///
/// `Clone` calls `AddRef`, `Drop` calls `Release`.
pub struct ComRef
{
    ptr: NonNull<c_void>,
}

// SAFETY: every interface this host deals with is free-threaded; the native
// plugin calls our objects from arbitrary threads and DAC/DBI objects are
// only used under the runtime wrapper's lock.
unsafe impl Send for ComRef {}
unsafe impl Sync for ComRef {}

impl ComRef
{
    /// Adopt a pointer that already carries a reference
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid COM interface pointer whose reference
    /// is transferred to the returned value.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self>
    {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Take a new reference on a borrowed pointer
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid, live COM interface pointer.
    pub unsafe fn from_borrowed(ptr: *mut c_void) -> Option<Self>
    {
        let reference = Self::from_raw(ptr)?;
        (reference.vtbl().add_ref)(reference.as_raw());
        Some(reference)
    }

    fn vtbl(&self) -> &IUnknownVtbl
    {
        // SAFETY: the first word of a COM interface is its vtable pointer.
        unsafe { &**self.ptr.as_ptr().cast::<*const IUnknownVtbl>() }
    }

    /// The raw interface pointer, still owned by `self`
    pub fn as_raw(&self) -> *mut c_void
    {
        self.ptr.as_ptr()
    }

    /// Give up ownership without releasing
    pub fn into_raw(self) -> *mut c_void
    {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Call the object's `QueryInterface`
    ///
    /// ## Errors
    ///
    /// The status returned by the object (usually `E_NOINTERFACE`).
    pub fn query_interface(&self, iid: &Guid) -> Result<ComRef, HResult>
    {
        let mut out = ptr::null_mut();
        // SAFETY: `self.ptr` is live and `out` is a valid out-pointer.
        let hr = unsafe { (self.vtbl().query_interface)(self.as_raw(), iid, &mut out) };
        hr.ok()?;
        // SAFETY: a successful QueryInterface hands us a new reference.
        unsafe { ComRef::from_raw(out) }.ok_or(HResult::E_NOINTERFACE)
    }

    /// Raw `AddRef` returning the new count; the caller owns the extra reference
    pub fn add_ref_raw(&self) -> u32
    {
        // SAFETY: `self.ptr` is live.
        unsafe { (self.vtbl().add_ref)(self.as_raw()) }
    }

    /// Raw `Release` of a reference previously taken with [`ComRef::add_ref_raw`]
    ///
    /// # Safety
    ///
    /// The caller must own a reference besides the one held by `self`.
    pub unsafe fn release_raw(&self) -> u32
    {
        (self.vtbl().release)(self.as_raw())
    }

    /// Call slot `index` of the vtable as `F`
    ///
    /// # Safety
    ///
    /// `F` must be the exact function pointer type of that slot and `index`
    /// must be within the vtable.
    pub unsafe fn slot<F: Copy>(&self, index: usize) -> F
    {
        let vtable = *self.ptr.as_ptr().cast::<*const *const c_void>();
        let entry = *vtable.add(index);
        std::mem::transmute_copy::<*const c_void, F>(&entry)
    }
}

impl Clone for ComRef
{
    fn clone(&self) -> Self
    {
        self.add_ref_raw();
        Self { ptr: self.ptr }
    }
}

impl Drop for ComRef
{
    fn drop(&mut self)
    {
        // SAFETY: `self` owns one reference.
        unsafe {
            (self.vtbl().release)(self.as_raw());
        }
    }
}

impl fmt::Debug for ComRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_tuple("ComRef").field(&self.ptr).finish()
    }
}

/// `Release` an interface pointer owned by the caller
///
/// # Safety
///
/// `ptr` must be null or a valid interface pointer carrying a reference
/// owned by the caller.
pub unsafe fn release(ptr: *mut c_void) -> u32
{
    match ComRef::from_raw(ptr) {
        Some(reference) => {
            let count = (reference.vtbl().release)(reference.as_raw());
            std::mem::forget(reference);
            count
        }
        None => 0,
    }
}
