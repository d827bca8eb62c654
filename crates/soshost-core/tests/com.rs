//! Reference counting, QueryInterface and vtable construction as seen by
//! native callers.

mod common;

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::{assert_hr, interface, slot_index};
use soshost_core::com::{ComClass, ComError, ComObject, ComObjectBuilder, Guid, HResult, IUNKNOWN};
use soshost_core::declare_interface;

declare_interface! {
    static ISMALL: "ISmall" = 0x5e1f0001_0000_0000_0000_000000000001 { First, Second, Third }
}

declare_interface! {
    static ILARGE: "ILarge" = 0x5e1f0002_0000_0000_0000_000000000002 { One, Two, Three, Four, Five }
}

const UNREGISTERED: Guid = Guid::from_u128(0x5e1f0003_0000_0000_0000_000000000003);

type QueryInterface = unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult;
type AddRef = unsafe extern "system" fn(*mut c_void) -> u32;
type Release = unsafe extern "system" fn(*mut c_void) -> u32;
type Value = unsafe extern "system" fn(*mut c_void) -> u32;

struct Counter
{
    value: u32,
    destroyed: Arc<AtomicUsize>,
}

impl ComClass for Counter
{
    fn destroy(&mut self)
    {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

unsafe extern "system" fn value(this: *mut c_void) -> u32
{
    ComObject::<Counter>::from_this(this).value
}

unsafe extern "system" fn value_plus_one(this: *mut c_void) -> u32
{
    ComObject::<Counter>::from_this(this).value + 1
}

fn counter(value: u32) -> (ComObjectBuilder<Counter>, Arc<AtomicUsize>)
{
    let destroyed = Arc::new(AtomicUsize::new(0));
    let builder = ComObjectBuilder::new(Counter {
        value,
        destroyed: destroyed.clone(),
    });
    (builder, destroyed)
}

/// Counter with ISmall (3 slots) and ILarge (5 slots)
fn two_interface_counter(initial: u32) -> (ComObject<Counter>, Arc<AtomicUsize>)
{
    let (mut builder, destroyed) = counter(initial);
    let mut vtable = builder.add_interface(&ISMALL, true);
    vtable.add_method(value as Value).add_method(value as Value).add_method(value as Value);
    vtable.complete().unwrap();

    let mut vtable = builder.add_interface(&ILARGE, true);
    for _ in 0..4 {
        vtable.add_method(value as Value);
    }
    vtable.add_method(value_plus_one as Value);
    vtable.complete().unwrap();
    (builder.finish(), destroyed)
}

unsafe fn native_query(this: *mut c_void, iid: &Guid) -> (HResult, *mut c_void)
{
    let query: QueryInterface = interface(this).slot(0);
    let mut out = ptr::null_mut();
    let hr = query(this, iid, &mut out);
    (hr, out)
}

#[test]
fn test_query_registered_interface_adds_reference()
{
    let (object, _) = two_interface_counter(7);
    let small = object.interface(&ISMALL.iid).unwrap();
    let before = object.ref_count();

    let (hr, large) = unsafe { native_query(small, &ILARGE.iid) };
    assert_hr(hr, HResult::S_OK);
    assert!(!large.is_null());
    assert_eq!(object.ref_count(), before + 1);

    let release: Release = unsafe { interface(large).slot(2) };
    unsafe { release(large) };
    assert_eq!(object.ref_count(), before);
}

#[test]
fn test_query_unregistered_interface_leaves_count()
{
    let (object, _) = two_interface_counter(7);
    let small = object.interface(&ISMALL.iid).unwrap();
    let before = object.ref_count();

    let (hr, out) = unsafe { native_query(small, &UNREGISTERED) };
    assert_hr(hr, HResult::E_NOINTERFACE);
    assert!(out.is_null());
    assert_eq!(object.ref_count(), before);
    assert_eq!(object.query_interface(&UNREGISTERED).unwrap_err(), ComError::NoInterface(UNREGISTERED));
}

#[test]
fn test_add_ref_then_release_is_neutral()
{
    let (object, destroyed) = two_interface_counter(1);
    let raw = object.interface(&IUNKNOWN.iid).unwrap();
    let add_ref: AddRef;
    let release: Release;
    unsafe {
        let unknown = interface(raw);
        add_ref = unknown.slot(1);
        release = unknown.slot(2);
    }
    let before = object.ref_count();
    unsafe {
        assert_eq!(add_ref(raw), before + 1);
        assert_eq!(release(raw), before);
    }
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_releases_destroy_exactly_once()
{
    const RELEASERS: usize = 16;
    let (object, destroyed) = two_interface_counter(3);
    let raw = object.to_raw(&ISMALL.iid).unwrap();
    for _ in 1..RELEASERS {
        object.add_ref();
    }
    // The handle's own reference goes first; RELEASERS native references remain.
    drop(object);
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);

    let release: Release = unsafe { interface(raw).slot(2) };
    let raw = raw as usize;
    let barrier = Arc::new(Barrier::new(RELEASERS));
    let handles: Vec<_> = (0..RELEASERS)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                unsafe { release(raw as *mut c_void) };
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_validated_vtable_rejects_missing_slots()
{
    let (mut builder, destroyed) = counter(0);
    let mut vtable = builder.add_interface(&ISMALL, true);
    vtable.add_method(value as Value).add_method(value as Value);
    assert_eq!(
        vtable.complete().unwrap_err(),
        ComError::SlotCountMismatch {
            interface: "ISmall",
            expected: 3,
            actual: 2,
        }
    );
    drop(builder);
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unvalidated_vtable_accepts_any_count()
{
    let (mut builder, _) = counter(0);
    let mut vtable = builder.add_interface(&ISMALL, false);
    vtable.add_method(value as Value);
    assert!(vtable.complete().is_ok());
}

#[test]
fn test_duplicate_interface_is_rejected()
{
    let (mut builder, _) = counter(0);
    builder.add_interface(&ILARGE, false).complete().unwrap();
    assert_eq!(
        builder.add_interface(&ILARGE, false).complete().unwrap_err(),
        ComError::DuplicateInterface("ILarge")
    );
}

#[test]
fn test_two_interfaces_share_one_identity()
{
    let (object, destroyed) = two_interface_counter(41);
    let small = object.to_raw(&ISMALL.iid).unwrap();
    let large = object.to_raw(&ILARGE.iid).unwrap();
    assert_ne!(small, large);

    unsafe {
        let first: Value = interface(small).slot(slot_index(&ISMALL, "First"));
        let five: Value = interface(large).slot(slot_index(&ILARGE, "Five"));
        assert_eq!(first(small), 41);
        assert_eq!(five(large), 42);

        // Both pointers reach the same IUnknown.
        let (_, unknown_a) = native_query(small, &IUNKNOWN.iid);
        let (_, unknown_b) = native_query(large, &IUNKNOWN.iid);
        assert_eq!(unknown_a, unknown_b);
        let release: Release = interface(small).slot(2);
        release(unknown_a);
        release(unknown_b);

        drop(object);
        assert_eq!(release(small), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(release(large), 0);
    }
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}
