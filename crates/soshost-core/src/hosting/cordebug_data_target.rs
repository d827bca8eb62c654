//! `ICorDebugDataTarget` family, DBI's view of the target.

use std::ffi::c_void;

use tracing::{debug, trace};

use super::{access, guard, metadata};
use crate::com::marshal::{read_wstr, write_out};
use crate::com::{ComClass, ComObject, ComObjectBuilder, HResult, VTableBuilder};
use crate::error::Result;
use crate::interfaces::{
    ICORDEBUG_DATA_TARGET, ICORDEBUG_DATA_TARGET4, ICORDEBUG_METADATA_LOCATOR, ICORDEBUG_MUTABLE_DATA_TARGET,
};
use crate::services::Services;
use crate::types::{Architecture, OperatingSystem};

/// `CorDebugPlatform` values
pub mod platform
{
    pub const WINDOWS_X86: u32 = 0;
    pub const WINDOWS_AMD64: u32 = 1;
    pub const WINDOWS_ARM: u32 = 5;
    pub const WINDOWS_ARM64: u32 = 7;
    pub const POSIX_AMD64: u32 = 8;
    pub const POSIX_X86: u32 = 9;
    pub const POSIX_ARM: u32 = 10;
    pub const POSIX_ARM64: u32 = 11;
}

/// `CORDB_PLATFORM_*` of a target, `None` for unsupported combinations
pub fn cordebug_platform(os: OperatingSystem, architecture: Architecture) -> Option<u32>
{
    let windows = match os {
        OperatingSystem::Windows => true,
        OperatingSystem::Linux | OperatingSystem::OSX => false,
        OperatingSystem::Unknown => return None,
    };
    let value = match (windows, architecture) {
        (true, Architecture::X86_64) => platform::WINDOWS_AMD64,
        (true, Architecture::X86) => platform::WINDOWS_X86,
        (true, Architecture::Arm) => platform::WINDOWS_ARM,
        (true, Architecture::Arm64) => platform::WINDOWS_ARM64,
        (false, Architecture::X86_64) => platform::POSIX_AMD64,
        (false, Architecture::X86) => platform::POSIX_X86,
        (false, Architecture::Arm) => platform::POSIX_ARM,
        (false, Architecture::Arm64) => platform::POSIX_ARM64,
        (_, Architecture::Unknown(_)) => return None,
    };
    Some(value)
}

/// DBI data target
///
/// Exposes `ICorDebugDataTarget`, `ICorDebugDataTarget4`,
/// `ICorDebugMutableDataTarget` and `ICorDebugMetaDataLocator`.
pub struct CorDebugDataTargetWrapper
{
    services: Services,
}

impl ComClass for CorDebugDataTargetWrapper
{
    fn destroy(&mut self)
    {
        debug!("CorDebugDataTargetWrapper destroyed");
    }
}

impl CorDebugDataTargetWrapper
{
    /// ## Errors
    ///
    /// - `Com`: a vtable does not match its interface description
    pub fn create(services: Services) -> Result<ComObject<Self>>
    {
        let mut builder = ComObjectBuilder::new(Self { services });

        let mut vtable = builder.add_interface(&ICORDEBUG_DATA_TARGET, true);
        add_data_target(&mut vtable);
        vtable.complete()?;

        let mut vtable = builder.add_interface(&ICORDEBUG_DATA_TARGET4, true);
        vtable.add_method(virtual_unwind as VirtualUnwind);
        vtable.complete()?;

        // The mutable target derives from ICorDebugDataTarget.
        let mut vtable = builder.add_interface(&ICORDEBUG_MUTABLE_DATA_TARGET, true);
        add_data_target(&mut vtable);
        vtable
            .add_method(write_virtual as WriteVirtual)
            .add_method(set_thread_context as SetThreadContext)
            .add_method(continue_status_changed as ContinueStatusChanged);
        vtable.complete()?;

        let mut vtable = builder.add_interface(&ICORDEBUG_METADATA_LOCATOR, true);
        vtable.add_method(get_metadata as GetMetaData);
        vtable.complete()?;

        Ok(builder.finish())
    }
}

fn add_data_target(vtable: &mut VTableBuilder<'_>)
{
    vtable
        .add_method(get_platform as GetPlatform)
        .add_method(read_virtual as ReadVirtual)
        .add_method(get_thread_context as GetThreadContext);
}

type GetPlatform = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type ReadVirtual = unsafe extern "system" fn(*mut c_void, u64, *mut u8, u32, *mut u32) -> HResult;
type GetThreadContext = unsafe extern "system" fn(*mut c_void, u32, u32, u32, *mut u8) -> HResult;
type VirtualUnwind = unsafe extern "system" fn(*mut c_void, u32, u32, *mut u8) -> HResult;
type WriteVirtual = unsafe extern "system" fn(*mut c_void, u64, *const u8, u32) -> HResult;
type SetThreadContext = unsafe extern "system" fn(*mut c_void, u32, u32, *const u8) -> HResult;
type ContinueStatusChanged = unsafe extern "system" fn(*mut c_void, u32, u32) -> HResult;
type GetMetaData = unsafe extern "system" fn(*mut c_void, *const u16, u32, u32, u32, *mut u32, *mut u16) -> HResult;

unsafe fn wrapper<'a>(this: *mut c_void) -> &'a CorDebugDataTargetWrapper
{
    ComObject::<CorDebugDataTargetWrapper>::from_this(this)
}

unsafe extern "system" fn get_platform(this: *mut c_void, platform: *mut u32) -> HResult
{
    guard("GetPlatform", HResult::E_FAIL, || {
        let target = &wrapper(this).services.target;
        match cordebug_platform(target.operating_system(), target.architecture()) {
            Some(value) => {
                write_out(platform, value);
                HResult::S_OK
            }
            None => {
                debug!(os = %target.operating_system(), arch = %target.architecture(), "GetPlatform: unsupported target");
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

unsafe extern "system" fn virtual_unwind(this: *mut c_void, thread_id: u32, context_size: u32, context: *mut u8) -> HResult
{
    guard("VirtualUnwind", HResult::E_FAIL, || {
        access::virtual_unwind(&wrapper(this).services, thread_id, context_size, context)
    })
}

unsafe extern "system" fn write_virtual(this: *mut c_void, address: u64, buffer: *const u8, size: u32) -> HResult
{
    guard("WriteVirtual", HResult::E_FAIL, || {
        access::write_virtual(&wrapper(this).services, address, buffer, size, std::ptr::null_mut())
    })
}

unsafe extern "system" fn set_thread_context(_this: *mut c_void, _thread_id: u32, _size: u32, _context: *const u8) -> HResult
{
    HResult::E_NOTIMPL
}

unsafe extern "system" fn continue_status_changed(_this: *mut c_void, thread_id: u32, status: u32) -> HResult
{
    trace!(thread_id, status, "ContinueStatusChanged not implemented");
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_metadata(
    this: *mut c_void,
    image_path: *const u16,
    timestamp: u32,
    size_of_image: u32,
    path_buffer_size: u32,
    needed: *mut u32,
    path_buffer: *mut u16,
) -> HResult
{
    guard("GetMetaData", HResult::E_FAIL, || {
        metadata::locate_metadata_file(
            wrapper(this).services.symbols.as_ref(),
            read_wstr(image_path),
            timestamp,
            size_of_image,
            path_buffer_size,
            needed,
            path_buffer,
        )
    })
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_platform_mapping()
    {
        assert_eq!(cordebug_platform(OperatingSystem::Windows, Architecture::X86_64), Some(platform::WINDOWS_AMD64));
        assert_eq!(cordebug_platform(OperatingSystem::Windows, Architecture::Arm64), Some(7));
        assert_eq!(cordebug_platform(OperatingSystem::Linux, Architecture::X86_64), Some(8));
        assert_eq!(cordebug_platform(OperatingSystem::OSX, Architecture::Arm64), Some(11));
        assert_eq!(cordebug_platform(OperatingSystem::Linux, Architecture::Unknown("riscv64")), None);
        assert_eq!(cordebug_platform(OperatingSystem::Unknown, Architecture::X86), None);
    }
}
