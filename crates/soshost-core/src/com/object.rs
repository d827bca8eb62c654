//! # COM-Callable Object
//!
//! One reference-counted identity carrying any number of interface vtables.
//!
//! ## Memory layout
//!
//! Every interface pointer handed to native code points at an
//! [`InterfaceHeader`]: the first word is the vtable pointer (what native
//! callers dereference), the second is a back-pointer to the shared
//! [`Identity`]. All interfaces on one object share the identity, so
//! `QueryInterface` from any of them reaches the same reference count.
//!
//! ```text
//!  interface ptr ──► ┌──────────────┐      ┌─────────────────────┐
//!                    │ vtable  ─────┼────► │ QueryInterface      │
//!                    │ identity ──┐ │      │ AddRef              │
//!                    └────────────┼─┘      │ Release             │
//!                                 │        │ slot 3 ...          │
//!                                 ▼        └─────────────────────┘
//!                    ┌──────────────────────────┐
//!                    │ ref_count (atomic)       │
//!                    │ interfaces: iid → header │
//!                    │ payload: Box<T>          │
//!                    └──────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`ComObjectBuilder::new`] boxes the payload with a count of zero and
//!    registers `IUnknown`
//! 2. adapters add their interfaces through [`VTableBuilder`]
//! 3. [`ComObjectBuilder::finish`] performs the initial `AddRef`; the returned
//!    [`ComObject`] owns that reference
//! 4. the release that observes the count reach zero calls
//!    [`ComClass::destroy`], drops the payload and frees every vtable

use std::any::TypeId;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicI32, Ordering};

use tracing::{debug, trace};

use super::vtable::{Slot, VTableBuilder};
use super::{ComError, ComRef, Guid, HResult, InterfaceDescriptor, IUNKNOWN};

/// Behaviour shared by every type placed behind a COM identity
///
/// Native callers may invoke slots from any thread, hence `Send + Sync`.
pub trait ComClass: Send + Sync + 'static
{
    /// Teardown hook, run once when the last reference is released
    ///
    /// Runs before the value is dropped. Never called for an object whose
    /// construction was abandoned before [`ComObjectBuilder::finish`].
    fn destroy(&mut self) {}
}

/// First words of every interface pointer
#[repr(C)]
pub(crate) struct InterfaceHeader
{
    vtable: *const Slot,
    identity: *const Identity,
}

struct InterfaceEntry
{
    iid: Guid,
    name: &'static str,
    header: Box<InterfaceHeader>,
    // Owns the memory `header.vtable` points into.
    _vtable: Box<[Slot]>,
}

/// Shared object header behind all interface pointers of one object
pub(crate) struct Identity
{
    ref_count: AtomicI32,
    interfaces: Vec<InterfaceEntry>,
    payload: *mut (),
    type_id: TypeId,
    type_name: &'static str,
    drop_payload: unsafe fn(*mut (), bool),
}

/// Drop the boxed payload, optionally running the destroy hook first.
unsafe fn drop_payload<T: ComClass>(payload: *mut (), destroy: bool)
{
    let mut value = Box::from_raw(payload.cast::<T>());
    if destroy {
        value.destroy();
    }
    drop(value);
}

impl Identity
{
    fn new<T: ComClass>(value: T) -> Box<Self>
    {
        Box::new(Self {
            ref_count: AtomicI32::new(0),
            interfaces: Vec::new(),
            payload: Box::into_raw(Box::new(value)).cast::<()>(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            drop_payload: drop_payload::<T>,
        })
    }

    /// Recover the identity behind an interface pointer.
    ///
    /// # Safety
    ///
    /// `this` must be an interface pointer produced by this module whose
    /// object is still alive.
    pub(crate) unsafe fn from_this<'a>(this: *mut c_void) -> &'a Identity
    {
        let header = this.cast::<InterfaceHeader>();
        &*(*header).identity
    }

    pub(crate) fn register(&mut self, iid: Guid, name: &'static str, slots: Vec<Slot>) -> Result<*mut c_void, ComError>
    {
        if self.interfaces.iter().any(|entry| entry.iid == iid) {
            return Err(ComError::DuplicateInterface(name));
        }

        let mut table: Vec<Slot> = Vec::with_capacity(slots.len() + 3);
        table.push(query_interface_thunk as unsafe extern "system" fn(_, _, _) -> _ as Slot);
        table.push(add_ref_thunk as unsafe extern "system" fn(_) -> _ as Slot);
        table.push(release_thunk as unsafe extern "system" fn(_) -> _ as Slot);
        table.extend(slots);
        let vtable = table.into_boxed_slice();

        let mut header = Box::new(InterfaceHeader {
            vtable: vtable.as_ptr(),
            identity: ptr::from_ref(&*self),
        });
        let this = ptr::from_mut(header.as_mut()).cast::<c_void>();
        self.interfaces.push(InterfaceEntry {
            iid,
            name,
            header,
            _vtable: vtable,
        });
        Ok(this)
    }

    fn find(&self, iid: &Guid) -> Option<*mut c_void>
    {
        self.interfaces
            .iter()
            .find(|entry| entry.iid == *iid)
            .map(|entry| ptr::from_ref(entry.header.as_ref()).cast_mut().cast::<c_void>())
    }

    fn add_ref(&self) -> u32
    {
        // Relaxed is enough: a new reference can only be made from an existing one.
        let count = self.ref_count.fetch_add(1, Ordering::Relaxed) + 1;
        count as u32
    }

    fn count(&self) -> u32
    {
        self.ref_count.load(Ordering::Acquire) as u32
    }

    /// Decrement and tear down on the transition to zero.
    ///
    /// # Safety
    ///
    /// `identity` must be live and the caller must own one reference, which
    /// this call consumes.
    unsafe fn release(identity: NonNull<Identity>) -> u32
    {
        let count = identity.as_ref().ref_count.fetch_sub(1, Ordering::Release) - 1;
        if count == 0 {
            fence(Ordering::Acquire);
            let identity = Box::from_raw(identity.as_ptr());
            debug!(object = identity.type_name, "last reference released, destroying");
            (identity.drop_payload)(identity.payload, true);
            drop(identity);
        }
        count as u32
    }

    /// Query without touching the count; used by typed accessors.
    unsafe fn payload<'a, T: ComClass>(&self) -> &'a T
    {
        debug_assert_eq!(self.type_id, TypeId::of::<T>(), "interface pointer does not belong to {}", self.type_name);
        &*self.payload.cast::<T>().cast_const()
    }
}

unsafe extern "system" fn query_interface_thunk(this: *mut c_void, iid: *const Guid, out: *mut *mut c_void) -> HResult
{
    if out.is_null() {
        return HResult::E_INVALIDARG;
    }
    *out = ptr::null_mut();
    if iid.is_null() {
        return HResult::E_INVALIDARG;
    }

    let identity = Identity::from_this(this);
    match identity.find(&*iid) {
        Some(interface) => {
            identity.add_ref();
            *out = interface;
            HResult::S_OK
        }
        None => {
            trace!(object = identity.type_name, iid = %*iid, "QueryInterface: no such interface");
            HResult::E_NOINTERFACE
        }
    }
}

unsafe extern "system" fn add_ref_thunk(this: *mut c_void) -> u32
{
    Identity::from_this(this).add_ref()
}

unsafe extern "system" fn release_thunk(this: *mut c_void) -> u32
{
    Identity::release(NonNull::from(Identity::from_this(this)))
}

/// An object under construction, reference count still zero
///
/// Dropping the builder abandons construction: the payload is dropped
/// without running [`ComClass::destroy`] and all vtables are freed.
pub struct ComObjectBuilder<T: ComClass>
{
    identity: Option<Box<Identity>>,
    _marker: PhantomData<T>,
}

impl<T: ComClass> ComObjectBuilder<T>
{
    /// Box `value` behind a new identity exposing only `IUnknown`
    pub fn new(value: T) -> Self
    {
        let mut identity = Identity::new(value);
        // IUnknown has no slots beyond the three every vtable starts with.
        let registered = identity.register(IUNKNOWN.iid, IUNKNOWN.name, Vec::new());
        debug_assert!(registered.is_ok());
        Self {
            identity: Some(identity),
            _marker: PhantomData,
        }
    }

    /// Begin a vtable for `descriptor`
    ///
    /// With `validate` set, [`VTableBuilder::complete`] checks the slot count
    /// against the descriptor.
    pub fn add_interface(&mut self, descriptor: &'static InterfaceDescriptor, validate: bool) -> VTableBuilder<'_>
    {
        let identity = self.identity.as_deref_mut().unwrap_or_else(|| unreachable!("builder already finished"));
        VTableBuilder::new(identity, descriptor, validate)
    }

    /// The wrapped value
    pub fn get(&self) -> &T
    {
        match self.identity.as_deref() {
            // SAFETY: the payload was created from a `T` in `new`.
            Some(identity) => unsafe { identity.payload::<T>() },
            None => unreachable!("builder already finished"),
        }
    }

    /// End construction with the initial `AddRef`
    pub fn finish(mut self) -> ComObject<T>
    {
        let identity = self.identity.take().unwrap_or_else(|| unreachable!("builder already finished"));
        identity.add_ref();
        ComObject {
            identity: NonNull::from(Box::leak(identity)),
            _marker: PhantomData,
        }
    }
}

impl<T: ComClass> Drop for ComObjectBuilder<T>
{
    fn drop(&mut self)
    {
        if let Some(identity) = self.identity.take() {
            debug!(object = identity.type_name, "construction abandoned");
            // SAFETY: the payload is still owned by the identity and was never published.
            unsafe { (identity.drop_payload)(identity.payload, false) };
        }
    }
}

/// Owned reference to a live COM-callable object
///
/// Holds one reference: `Clone` adds one, `Drop` releases one. The value is
/// reachable through `Deref`.
pub struct ComObject<T: ComClass>
{
    identity: NonNull<Identity>,
    _marker: PhantomData<T>,
}

// SAFETY: the identity only hands out shared references to a `Send + Sync` payload
// and its count is atomic.
unsafe impl<T: ComClass> Send for ComObject<T> {}
unsafe impl<T: ComClass> Sync for ComObject<T> {}

impl<T: ComClass> ComObject<T>
{
    fn identity(&self) -> &Identity
    {
        // SAFETY: this handle owns a reference, so the identity is alive.
        unsafe { self.identity.as_ref() }
    }

    /// Recover the value behind an interface pointer inside a vtable thunk
    ///
    /// # Safety
    ///
    /// `this` must be an interface pointer of a live `ComObject<T>`; native
    /// callers guarantee this by holding a reference for the duration of the
    /// call.
    pub unsafe fn from_this<'a>(this: *mut c_void) -> &'a T
    {
        Identity::from_this(this).payload::<T>()
    }

    /// Interface pointer for `iid`, borrowed from this handle (no `AddRef`)
    pub fn interface(&self, iid: &Guid) -> Option<*mut c_void>
    {
        self.identity().find(iid)
    }

    /// `QueryInterface` from the Rust side
    ///
    /// ## Errors
    ///
    /// - `NoInterface`: `iid` is not registered on this object
    pub fn query_interface(&self, iid: &Guid) -> Result<ComRef, ComError>
    {
        let interface = self.interface(iid).ok_or(ComError::NoInterface(*iid))?;
        self.identity().add_ref();
        // SAFETY: the pointer is live and the reference just added is transferred.
        unsafe { ComRef::from_raw(interface) }.ok_or(ComError::NullPointer)
    }

    /// Interface pointer for `iid` carrying a new reference, for handing to native code
    pub fn to_raw(&self, iid: &Guid) -> Option<*mut c_void>
    {
        let interface = self.interface(iid)?;
        self.identity().add_ref();
        Some(interface)
    }

    /// Add a reference that the caller must balance with a native `Release`
    pub fn add_ref(&self) -> u32
    {
        self.identity().add_ref()
    }

    /// Current reference count, for diagnostics and tests
    pub fn ref_count(&self) -> u32
    {
        self.identity().count()
    }

    /// IIDs registered on this object, `IUnknown` first
    pub fn interfaces(&self) -> Vec<(Guid, &'static str)>
    {
        self.identity().interfaces.iter().map(|entry| (entry.iid, entry.name)).collect()
    }
}

impl<T: ComClass> Deref for ComObject<T>
{
    type Target = T;

    fn deref(&self) -> &T
    {
        // SAFETY: the payload was created from a `T` and lives as long as the identity.
        unsafe { self.identity().payload::<T>() }
    }
}

impl<T: ComClass> Clone for ComObject<T>
{
    fn clone(&self) -> Self
    {
        self.identity().add_ref();
        Self {
            identity: self.identity,
            _marker: PhantomData,
        }
    }
}

impl<T: ComClass> Drop for ComObject<T>
{
    fn drop(&mut self)
    {
        // SAFETY: this handle owns exactly one reference.
        unsafe {
            Identity::release(self.identity);
        }
    }
}
