//! `ICLRDataTarget` family, the DAC's view of the target.
//!
//! One object exposes `ICLRDataTarget`, `ICLRDataTarget2`, `ICLRDataTarget4`,
//! `ICLRMetadataLocator` and `ICLRRuntimeLocator`. The runtime wrapper creates
//! a short-lived instance for every `CLRDataCreateInstance` call; the DAC
//! keeps its own reference for as long as it needs one.

use std::ffi::c_void;

use tracing::{debug, trace};

use super::{access, guard, metadata};
use crate::com::marshal::{read_wstr, write_out};
use crate::com::{ComClass, ComObject, ComObjectBuilder, HResult, VTableBuilder};
use crate::error::Result;
use crate::interfaces::{ICLR_DATA_TARGET, ICLR_DATA_TARGET2, ICLR_DATA_TARGET4, ICLR_METADATA_LOCATOR, ICLR_RUNTIME_LOCATOR};
use crate::services::symbols::keys::file_name;
use crate::services::Services;
use crate::types::{Address, ThreadId};

/// DAC data target over one runtime of one target
pub struct DataTargetWrapper
{
    services: Services,
    runtime_base: Address,
}

impl ComClass for DataTargetWrapper
{
    fn destroy(&mut self)
    {
        debug!(runtime_base = %self.runtime_base, "DataTargetWrapper destroyed");
    }
}

impl DataTargetWrapper
{
    /// Build the object with every data target interface registered
    ///
    /// ## Errors
    ///
    /// - `Com`: a vtable does not match its interface description
    pub fn create(services: Services, runtime_base: Address) -> Result<ComObject<Self>>
    {
        let mut builder = ComObjectBuilder::new(Self {
            services,
            runtime_base,
        });

        let mut vtable = builder.add_interface(&ICLR_DATA_TARGET, true);
        add_data_target(&mut vtable);
        vtable.complete()?;

        let mut vtable = builder.add_interface(&ICLR_DATA_TARGET2, true);
        add_data_target(&mut vtable);
        vtable.add_method(alloc_virtual as AllocVirtual);
        vtable.add_method(free_virtual as FreeVirtual);
        vtable.complete()?;

        let mut vtable = builder.add_interface(&ICLR_DATA_TARGET4, true);
        vtable.add_method(virtual_unwind as VirtualUnwind);
        vtable.complete()?;

        let mut vtable = builder.add_interface(&ICLR_METADATA_LOCATOR, true);
        vtable.add_method(get_metadata as GetMetadata);
        vtable.complete()?;

        let mut vtable = builder.add_interface(&ICLR_RUNTIME_LOCATOR, true);
        vtable.add_method(get_runtime_base as GetRuntimeBase);
        vtable.complete()?;

        Ok(builder.finish())
    }

    /// Base address of the runtime module this target was created for
    pub fn runtime_base(&self) -> Address
    {
        self.runtime_base
    }
}

fn add_data_target(vtable: &mut VTableBuilder<'_>)
{
    vtable
        .add_method(get_machine_type as GetMachineType)
        .add_method(get_pointer_size as GetPointerSize)
        .add_method(get_image_base as GetImageBase)
        .add_method(read_virtual as ReadVirtual)
        .add_method(write_virtual as WriteVirtual)
        .add_method(get_tls_value as GetTlsValue)
        .add_method(set_tls_value as SetTlsValue)
        .add_method(get_current_thread_id as GetCurrentThreadId)
        .add_method(get_thread_context as GetThreadContext)
        .add_method(set_thread_context as SetThreadContext)
        .add_method(request as Request);
}

type GetMachineType = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type GetPointerSize = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type GetImageBase = unsafe extern "system" fn(*mut c_void, *const u16, *mut u64) -> HResult;
type ReadVirtual = unsafe extern "system" fn(*mut c_void, u64, *mut u8, u32, *mut u32) -> HResult;
type WriteVirtual = unsafe extern "system" fn(*mut c_void, u64, *const u8, u32, *mut u32) -> HResult;
type GetTlsValue = unsafe extern "system" fn(*mut c_void, u32, u32, *mut u64) -> HResult;
type SetTlsValue = unsafe extern "system" fn(*mut c_void, u32, u32, u64) -> HResult;
type GetCurrentThreadId = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type GetThreadContext = unsafe extern "system" fn(*mut c_void, u32, u32, u32, *mut u8) -> HResult;
type SetThreadContext = unsafe extern "system" fn(*mut c_void, u32, u32, *const u8) -> HResult;
type Request = unsafe extern "system" fn(*mut c_void, u32, u32, *const u8, u32, *mut u8) -> HResult;
type AllocVirtual = unsafe extern "system" fn(*mut c_void, u64, u32, u32, u32, *mut u64) -> HResult;
type FreeVirtual = unsafe extern "system" fn(*mut c_void, u64, u32, u32) -> HResult;
type VirtualUnwind = unsafe extern "system" fn(*mut c_void, u32, u32, *mut u8) -> HResult;
type GetMetadata =
    unsafe extern "system" fn(*mut c_void, *const u16, u32, u32, *const u8, u32, u32, u32, *mut u8, *mut u32) -> HResult;
type GetRuntimeBase = unsafe extern "system" fn(*mut c_void, *mut u64) -> HResult;

unsafe fn wrapper<'a>(this: *mut c_void) -> &'a DataTargetWrapper
{
    ComObject::<DataTargetWrapper>::from_this(this)
}

unsafe extern "system" fn get_machine_type(this: *mut c_void, machine: *mut u32) -> HResult
{
    guard("GetMachineType", HResult::E_FAIL, || {
        let machine_type = wrapper(this).services.target.architecture().image_file_machine();
        write_out(machine, machine_type);
        HResult::S_OK
    })
}

unsafe extern "system" fn get_pointer_size(this: *mut c_void, size: *mut u32) -> HResult
{
    guard("GetPointerSize", HResult::E_FAIL, || {
        let pointer_size = wrapper(this).services.memory.pointer_size();
        write_out(size, pointer_size as u32);
        HResult::S_OK
    })
}

unsafe extern "system" fn get_image_base(this: *mut c_void, image_path: *const u16, base: *mut u64) -> HResult
{
    guard("GetImageBase", HResult::E_FAIL, || {
        let Some(image_path) = read_wstr(image_path) else {
            write_out(base, 0);
            return HResult::E_INVALIDARG;
        };
        let modules = &wrapper(this).services.modules;
        match modules.modules_by_name(file_name(&image_path)).first() {
            Some(module) => {
                write_out(base, module.image_base.value());
                HResult::S_OK
            }
            None => {
                trace!(image = %image_path, "GetImageBase: module not loaded");
                write_out(base, 0);
                HResult::E_FAIL
            }
        }
    })
}

unsafe extern "system" fn read_virtual(this: *mut c_void, address: u64, buffer: *mut u8, size: u32, read: *mut u32) -> HResult
{
    guard("ReadVirtual", HResult::E_FAIL, || {
        access::read_virtual(&wrapper(this).services, address, buffer, size, read)
    })
}

unsafe extern "system" fn write_virtual(
    this: *mut c_void,
    address: u64,
    buffer: *const u8,
    size: u32,
    written: *mut u32,
) -> HResult
{
    guard("WriteVirtual", HResult::E_FAIL, || {
        access::write_virtual(&wrapper(this).services, address, buffer, size, written)
    })
}

unsafe extern "system" fn get_tls_value(_this: *mut c_void, _thread_id: u32, _index: u32, _value: *mut u64) -> HResult
{
    HResult::E_NOTIMPL
}

unsafe extern "system" fn set_tls_value(_this: *mut c_void, _thread_id: u32, _index: u32, _value: u64) -> HResult
{
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_current_thread_id(this: *mut c_void, thread_id: *mut u32) -> HResult
{
    guard("GetCurrentThreadID", HResult::E_FAIL, || {
        match wrapper(this).services.current_thread() {
            Some(thread) => {
                write_out(thread_id, thread.thread_id.raw());
                HResult::S_OK
            }
            None => {
                write_out(thread_id, 0);
                HResult::E_FAIL
            }
        }
    })
}

unsafe extern "system" fn get_thread_context(
    this: *mut c_void,
    thread_id: u32,
    _context_flags: u32,
    context_size: u32,
    context: *mut u8,
) -> HResult
{
    guard("GetThreadContext", HResult::E_FAIL, || {
        access::thread_context(&wrapper(this).services, thread_id, context_size as usize, context)
    })
}

unsafe extern "system" fn set_thread_context(_this: *mut c_void, thread_id: u32, _size: u32, _context: *const u8) -> HResult
{
    trace!(thread = %ThreadId(thread_id), "SetThreadContext not implemented");
    HResult::E_NOTIMPL
}

unsafe extern "system" fn request(
    _this: *mut c_void,
    request_code: u32,
    _in_size: u32,
    _in_buffer: *const u8,
    _out_size: u32,
    _out_buffer: *mut u8,
) -> HResult
{
    trace!(request_code, "Request not implemented");
    HResult::E_NOTIMPL
}

unsafe extern "system" fn alloc_virtual(
    this: *mut c_void,
    address: u64,
    size: u32,
    type_flags: u32,
    protect_flags: u32,
    allocated: *mut u64,
) -> HResult
{
    guard("AllocVirtual", HResult::E_FAIL, || {
        let Some(remote) = wrapper(this).services.remote_memory.as_ref() else {
            return HResult::E_NOTIMPL;
        };
        match remote.allocate(Address::new(address), size, type_flags, protect_flags) {
            Ok(remote_address) => {
                write_out(allocated, remote_address.value());
                HResult::S_OK
            }
            Err(_) => HResult::E_FAIL,
        }
    })
}

unsafe extern "system" fn free_virtual(this: *mut c_void, address: u64, size: u32, type_flags: u32) -> HResult
{
    guard("FreeVirtual", HResult::E_FAIL, || {
        let Some(remote) = wrapper(this).services.remote_memory.as_ref() else {
            return HResult::E_NOTIMPL;
        };
        HResult::from(remote.free(Address::new(address), size, type_flags).is_ok())
    })
}

unsafe extern "system" fn virtual_unwind(this: *mut c_void, thread_id: u32, context_size: u32, context: *mut u8) -> HResult
{
    guard("VirtualUnwind", HResult::E_FAIL, || {
        access::virtual_unwind(&wrapper(this).services, thread_id, context_size, context)
    })
}

unsafe extern "system" fn get_metadata(
    this: *mut c_void,
    image_path: *const u16,
    timestamp: u32,
    size_of_image: u32,
    _mvid: *const u8,
    _metadata_rva: u32,
    _flags: u32,
    buffer_size: u32,
    buffer: *mut u8,
    data_size: *mut u32,
) -> HResult
{
    guard("GetMetadata", HResult::E_FAIL, || {
        metadata::locate_metadata(
            wrapper(this).services.symbols.as_ref(),
            read_wstr(image_path),
            timestamp,
            size_of_image,
            buffer_size,
            buffer,
            data_size,
        )
    })
}

unsafe extern "system" fn get_runtime_base(this: *mut c_void, base: *mut u64) -> HResult
{
    guard("GetRuntimeBase", HResult::E_FAIL, || {
        write_out(base, wrapper(this).runtime_base.value());
        HResult::S_OK
    })
}
