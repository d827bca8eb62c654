//! `IRuntime`, one CLR instance of the target.
//!
//! Owns the DAC and DBI loaded for that runtime and the process objects
//! created from them. Both process objects are created on first request and
//! released when the target flushes.

use std::ffi::{c_char, c_void, CString};
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info};

use super::{guard, CachedInterface, CorDebugDataTargetWrapper, DataTargetWrapper};
use crate::com::marshal::{buffer_mut, copy_truncated, read_cstr, to_wide, write_out};
use crate::com::{ComClass, ComObject, ComObjectBuilder, ComRef, Guid, HResult};
use crate::error::Result;
use crate::interfaces::{ICLR_DATA_TARGET, ICORDEBUG_DATA_TARGET, IID_ICORDEBUG_PROCESS, IID_IXCLR_DATA_PROCESS, IRUNTIME};
use crate::loader::NativeLibrary;
use crate::services::{FlushToken, Runtime, RuntimeType, Services};
use crate::types::{OperatingSystem, VsFixedFileInfo};

/// `RuntimeConfiguration` values returned by `GetRuntimeConfiguration`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RuntimeConfiguration
{
    WindowsDesktop = 0,
    WindowsCore = 1,
    UnixCore = 2,
    OSXCore = 3,
    Unknown = 4,
}

impl RuntimeConfiguration
{
    /// Configuration of a runtime flavor on `os`
    ///
    /// macOS runtimes report `UnixCore`; SOS treats both alike.
    pub fn of(runtime_type: RuntimeType, os: OperatingSystem) -> Self
    {
        match (runtime_type, os) {
            (RuntimeType::Desktop, _) => RuntimeConfiguration::WindowsDesktop,
            (RuntimeType::NetCore | RuntimeType::SingleFile, OperatingSystem::Windows) => RuntimeConfiguration::WindowsCore,
            (RuntimeType::NetCore | RuntimeType::SingleFile, OperatingSystem::Linux | OperatingSystem::OSX) => {
                RuntimeConfiguration::UnixCore
            }
            _ => RuntimeConfiguration::Unknown,
        }
    }

    pub fn from_raw(value: i32) -> Self
    {
        match value {
            0 => RuntimeConfiguration::WindowsDesktop,
            1 => RuntimeConfiguration::WindowsCore,
            2 => RuntimeConfiguration::UnixCore,
            3 => RuntimeConfiguration::OSXCore,
            _ => RuntimeConfiguration::Unknown,
        }
    }
}

/// `CLR_DEBUGGING_VERSION`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ClrDebuggingVersion
{
    struct_version: u16,
    major: u16,
    minor: u16,
    build: u16,
    revision: u16,
}

/// Highest debugger version this host claims to support
const MAX_DEBUGGER_SUPPORTED_VERSION: ClrDebuggingVersion = ClrDebuggingVersion {
    struct_version: 0,
    major: 4,
    minor: 0,
    build: 0,
    revision: 0,
};

const DLL_PROCESS_ATTACH: u32 = 1;

type ClrDataCreateInstance = unsafe extern "system" fn(*const Guid, *mut c_void, *mut *mut c_void) -> HResult;
type DllMain = unsafe extern "system" fn(*mut c_void, u32, *mut c_void) -> i32;
type DacLoadLibraryW = unsafe extern "system" fn(*const u16) -> *mut c_void;
type OpenVirtualProcessImpl2 = unsafe extern "system" fn(
    u64,
    *mut c_void,
    *const u16,
    *const ClrDebuggingVersion,
    *const Guid,
    *mut *mut c_void,
    *mut u32,
) -> HResult;
type OpenVirtualProcessImpl = unsafe extern "system" fn(
    u64,
    *mut c_void,
    *mut c_void,
    *const ClrDebuggingVersion,
    *const Guid,
    *mut *mut c_void,
    *mut u32,
) -> HResult;
type OpenVirtualProcess =
    unsafe extern "system" fn(u64, *mut c_void, *mut c_void, *const Guid, *mut *mut c_void, *mut u32) -> HResult;

/// State shared with the flush subscription
struct RuntimeState
{
    clr_data_process: CachedInterface,
    cor_debug_process: CachedInterface,
    dac: Mutex<Option<NativeLibrary>>,
    dbi: Mutex<Option<NativeLibrary>>,
}

impl RuntimeState
{
    fn flush(&self)
    {
        self.cor_debug_process.clear();
        self.clr_data_process.clear();
    }
}

/// `IRuntime` over one [`Runtime`]
pub struct RuntimeWrapper
{
    services: Services,
    runtime: Arc<dyn Runtime>,
    state: Arc<RuntimeState>,
    flush_token: FlushToken,
    // Backing storage of the string returned by GetRuntimeDirectory.
    directory: Mutex<Option<CString>>,
}

impl ComClass for RuntimeWrapper
{
    fn destroy(&mut self)
    {
        debug!(runtime = %self.runtime.runtime_module().file_name, "RuntimeWrapper destroyed");
        self.services.target.flush_event().unregister(self.flush_token);
        self.state.flush();
        self.state.dac.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.state.dbi.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl RuntimeWrapper
{
    /// ## Errors
    ///
    /// - `Com`: the vtable does not match the interface description
    pub fn create(services: Services, runtime: Arc<dyn Runtime>) -> Result<ComObject<Self>>
    {
        let state = Arc::new(RuntimeState {
            clr_data_process: CachedInterface::new("IXCLRDataProcess"),
            cor_debug_process: CachedInterface::new("ICorDebugProcess"),
            dac: Mutex::new(None),
            dbi: Mutex::new(None),
        });
        let flushed = Arc::clone(&state);
        let flush_token = services.target.flush_event().register(move || flushed.flush());

        let mut builder = ComObjectBuilder::new(Self {
            services,
            runtime,
            state,
            flush_token,
            directory: Mutex::new(None),
        });
        let mut vtable = builder.add_interface(&IRUNTIME, true);
        vtable
            .add_method(get_runtime_configuration as GetRuntimeConfiguration)
            .add_method(get_module_address as GetModuleAddress)
            .add_method(get_module_size as GetModuleSize)
            .add_method(set_runtime_directory as SetRuntimeDirectory)
            .add_method(get_runtime_directory as GetRuntimeDirectory)
            .add_method(get_clr_data_process as GetClrDataProcess)
            .add_method(get_cor_debug_interface as GetCorDebugInterface)
            .add_method(get_ee_version as GetEeVersion);
        // An abandoned builder never runs destroy, so the subscription is dropped here.
        if let Err(err) = vtable.complete() {
            builder.get().services.target.flush_event().unregister(builder.get().flush_token);
            return Err(err.into());
        }
        Ok(builder.finish())
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime>
    {
        &self.runtime
    }

    pub fn configuration(&self) -> RuntimeConfiguration
    {
        RuntimeConfiguration::of(self.runtime.runtime_type(), self.services.target.operating_system())
    }

    /// Directory of the runtime module, or the `setclrpath` override
    pub fn runtime_directory(&self) -> Option<String>
    {
        self.runtime
            .runtime_module_directory()
            .or_else(|| self.runtime.runtime_module().directory())
    }

    /// Whether a DAC process object is cached
    pub fn has_clr_data_process(&self) -> bool
    {
        self.state.clr_data_process.is_present()
    }

    /// Whether a DBI process object is cached
    pub fn has_cor_debug_process(&self) -> bool
    {
        self.state.cor_debug_process.is_present()
    }

    /// The loaded DAC's module handle, loading it on first use
    fn dac_handle(&self) -> Option<*mut c_void>
    {
        let mut dac = self.state.dac.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(library) = dac.as_ref() {
            return Some(library.raw_handle());
        }
        let Some(path) = self.runtime.dac_file_path() else {
            error!(runtime = %self.runtime.runtime_module().file_name, "could not find matching DAC for this runtime");
            return None;
        };
        let library = match NativeLibrary::load(&path) {
            Ok(library) => library,
            Err(err) => {
                error!(error = %err, "DAC load failed");
                return None;
            }
        };
        if OperatingSystem::current() != OperatingSystem::Windows {
            // SAFETY: the DAC's PAL DllMain has the Win32 signature.
            if let Some(dll_main) = unsafe { library.export::<DllMain>("DllMain") } {
                // SAFETY: the handle belongs to the library being initialized.
                unsafe { dll_main(library.raw_handle(), DLL_PROCESS_ATTACH, ptr::null_mut()) };
            }
        }
        let handle = library.raw_handle();
        *dac = Some(library);
        Some(handle)
    }

    fn create_clr_data_process(&self) -> std::result::Result<ComRef, HResult>
    {
        self.dac_handle().ok_or(HResult::E_NOINTERFACE)?;
        let dac = self.state.dac.lock().unwrap_or_else(PoisonError::into_inner);
        let library = dac.as_ref().ok_or(HResult::E_NOINTERFACE)?;
        // SAFETY: documented DAC export signature.
        let Some(create_instance) = (unsafe { library.export::<ClrDataCreateInstance>("CLRDataCreateInstance") }) else {
            error!("failed to obtain DAC CLRDataCreateInstance");
            return Err(HResult::E_NOINTERFACE);
        };

        let data_target = DataTargetWrapper::create(self.services.clone(), self.runtime.runtime_module().image_base)
            .map_err(|err| HResult::from(&err))?;
        let target_interface = data_target.interface(&ICLR_DATA_TARGET.iid).ok_or(HResult::E_NOINTERFACE)?;
        let mut instance = ptr::null_mut();
        // SAFETY: the data target stays alive for the call; the DAC takes its own reference.
        let hr = unsafe { create_instance(&IID_IXCLR_DATA_PROCESS, target_interface, &mut instance) };
        drop(data_target);
        if hr != HResult::S_OK {
            error!(hresult = %hr, "CLRDataCreateInstance FAILED");
            return Err(HResult::E_NOINTERFACE);
        }
        // SAFETY: a successful CLRDataCreateInstance returns an owned reference.
        unsafe { ComRef::from_raw(instance) }.ok_or(HResult::E_NOINTERFACE)
    }

    fn create_cor_debug_process(&self) -> std::result::Result<ComRef, HResult>
    {
        let (Some(dbi_path), Some(dac_path)) = (self.runtime.dbi_file_path(), self.runtime.dac_file_path()) else {
            error!(runtime = %self.runtime.runtime_module().file_name, "could not find matching DBI or DAC for this runtime");
            return Err(HResult::E_NOINTERFACE);
        };

        let mut dbi = self.state.dbi.lock().unwrap_or_else(PoisonError::into_inner);
        if dbi.is_none() {
            match NativeLibrary::load(&dbi_path) {
                Ok(library) => *dbi = Some(library),
                Err(err) => {
                    error!(error = %err, "DBI load failed");
                    return Err(HResult::E_NOINTERFACE);
                }
            }
        }
        let library = dbi.as_ref().ok_or(HResult::E_NOINTERFACE)?;

        let data_target = CorDebugDataTargetWrapper::create(self.services.clone()).map_err(|err| HResult::from(&err))?;
        let target_interface = data_target.interface(&ICORDEBUG_DATA_TARGET.iid).ok_or(HResult::E_NOINTERFACE)?;
        let instance_id = self.runtime.runtime_module().image_base.value();
        let result = self.open_virtual_process(library, instance_id, target_interface, &dac_path);
        drop(data_target);
        result
    }

    fn open_virtual_process(
        &self,
        dbi: &NativeLibrary,
        instance_id: u64,
        data_target: *mut c_void,
        dac_path: &Path,
    ) -> std::result::Result<ComRef, HResult>
    {
        let version = MAX_DEBUGGER_SUPPORTED_VERSION;
        let mut instance = ptr::null_mut();
        let mut flags = 0u32;

        // SAFETY: documented DBI export signature.
        if let Some(open) = unsafe { dbi.export::<OpenVirtualProcessImpl2>("OpenVirtualProcessImpl2") } {
            let dac_path = to_wide(&dac_path.to_string_lossy());
            // SAFETY: every pointer argument outlives the call.
            let hr = unsafe {
                open(instance_id, data_target, dac_path.as_ptr(), &version, &IID_ICORDEBUG_PROCESS, &mut instance, &mut flags)
            };
            return finish_open("OpenVirtualProcessImpl2", hr, instance);
        }

        let dac_handle = self.dbi_dac_handle(dac_path)?;

        // SAFETY: documented DBI export signature.
        if let Some(open) = unsafe { dbi.export::<OpenVirtualProcessImpl>("OpenVirtualProcessImpl") } {
            // SAFETY: every pointer argument outlives the call.
            let hr =
                unsafe { open(instance_id, data_target, dac_handle, &version, &IID_ICORDEBUG_PROCESS, &mut instance, &mut flags) };
            return finish_open("OpenVirtualProcessImpl", hr, instance);
        }

        // SAFETY: documented DBI export signature.
        if let Some(open) = unsafe { dbi.export::<OpenVirtualProcess>("OpenVirtualProcess") } {
            // SAFETY: every pointer argument outlives the call.
            let hr = unsafe { open(instance_id, data_target, dac_handle, &IID_ICORDEBUG_PROCESS, &mut instance, &mut flags) };
            return finish_open("OpenVirtualProcess", hr, instance);
        }

        error!("DBI OpenVirtualProcess not found");
        Err(HResult::E_NOINTERFACE)
    }

    /// DAC handle as DBI expects it
    ///
    /// Outside Windows DBI and the DAC share a PAL, so the handle is
    /// re-created through the DAC's own `LoadLibraryW`.
    fn dbi_dac_handle(&self, dac_path: &Path) -> std::result::Result<*mut c_void, HResult>
    {
        let handle = self.dac_handle().ok_or(HResult::E_NOINTERFACE)?;
        if OperatingSystem::current() == OperatingSystem::Windows {
            return Ok(handle);
        }
        let dac = self.state.dac.lock().unwrap_or_else(PoisonError::into_inner);
        let library = dac.as_ref().ok_or(HResult::E_NOINTERFACE)?;
        // SAFETY: the DAC's PAL LoadLibraryW has the Win32 signature.
        let Some(load_library) = (unsafe { library.export::<DacLoadLibraryW>("LoadLibraryW") }) else {
            error!("can not find the DAC LoadLibraryW export");
            return Err(HResult::E_NOINTERFACE);
        };
        let wide = to_wide(&dac_path.to_string_lossy());
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let pal_handle = unsafe { load_library(wide.as_ptr()) };
        if pal_handle.is_null() {
            error!(path = %dac_path.display(), "DAC LoadLibraryW FAILED");
            return Err(HResult::E_NOINTERFACE);
        }
        Ok(pal_handle)
    }
}

fn finish_open(export: &'static str, hr: HResult, instance: *mut c_void) -> std::result::Result<ComRef, HResult>
{
    if hr != HResult::S_OK {
        error!(export, hresult = %hr, "DBI open FAILED");
        return Err(HResult::E_NOINTERFACE);
    }
    info!(export, "DBI open SUCCEEDED");
    // SAFETY: a successful open returns an owned reference.
    unsafe { ComRef::from_raw(instance) }.ok_or(HResult::E_NOINTERFACE)
}

type GetRuntimeConfiguration = unsafe extern "system" fn(*mut c_void) -> RuntimeConfiguration;
type GetModuleAddress = unsafe extern "system" fn(*mut c_void) -> u64;
type GetModuleSize = unsafe extern "system" fn(*mut c_void) -> u64;
type SetRuntimeDirectory = unsafe extern "system" fn(*mut c_void, *const c_char);
type GetRuntimeDirectory = unsafe extern "system" fn(*mut c_void) -> *const c_char;
type GetClrDataProcess = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;
type GetCorDebugInterface = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;
type GetEeVersion = unsafe extern "system" fn(*mut c_void, *mut VsFixedFileInfo, *mut u8, i32) -> HResult;

unsafe fn wrapper<'a>(this: *mut c_void) -> &'a RuntimeWrapper
{
    ComObject::<RuntimeWrapper>::from_this(this)
}

unsafe extern "system" fn get_runtime_configuration(this: *mut c_void) -> RuntimeConfiguration
{
    guard("GetRuntimeConfiguration", RuntimeConfiguration::Unknown, || wrapper(this).configuration())
}

unsafe extern "system" fn get_module_address(this: *mut c_void) -> u64
{
    guard("GetModuleAddress", 0, || wrapper(this).runtime.runtime_module().image_base.value())
}

unsafe extern "system" fn get_module_size(this: *mut c_void) -> u64
{
    guard("GetModuleSize", 0, || wrapper(this).runtime.runtime_module().image_size)
}

unsafe extern "system" fn set_runtime_directory(this: *mut c_void, directory: *const c_char)
{
    guard("SetRuntimeDirectory", (), || {
        let directory = read_cstr(directory);
        debug!(directory = ?directory, "runtime directory changed");
        let runtime = &wrapper(this).runtime;
        runtime.set_runtime_module_directory(directory);
    });
}

unsafe extern "system" fn get_runtime_directory(this: *mut c_void) -> *const c_char
{
    guard("GetRuntimeDirectory", ptr::null(), || {
        let wrapper = wrapper(this);
        let Some(directory) = wrapper.runtime_directory() else {
            return ptr::null();
        };
        let Ok(directory) = CString::new(directory) else {
            return ptr::null();
        };
        // The pointer stays valid until the next call replaces the string.
        let mut cached = wrapper.directory.lock().unwrap_or_else(PoisonError::into_inner);
        cached.insert(directory).as_ptr()
    })
}

unsafe extern "system" fn get_clr_data_process(this: *mut c_void, process: *mut *mut c_void) -> HResult
{
    guard("GetClrDataProcess", HResult::E_FAIL, || {
        if process.is_null() {
            return HResult::E_INVALIDARG;
        }
        let wrapper = wrapper(this);
        match wrapper.state.clr_data_process.get_or_create(|| wrapper.create_clr_data_process()) {
            Ok(instance) => {
                write_out(process, instance);
                HResult::S_OK
            }
            Err(hr) => {
                write_out(process, ptr::null_mut());
                hr
            }
        }
    })
}

unsafe extern "system" fn get_cor_debug_interface(this: *mut c_void, process: *mut *mut c_void) -> HResult
{
    guard("GetCorDebugInterface", HResult::E_FAIL, || {
        if process.is_null() {
            return HResult::E_INVALIDARG;
        }
        let wrapper = wrapper(this);
        match wrapper.state.cor_debug_process.get_or_create(|| wrapper.create_cor_debug_process()) {
            Ok(instance) => {
                write_out(process, instance);
                HResult::S_OK
            }
            Err(hr) => {
                write_out(process, ptr::null_mut());
                hr
            }
        }
    })
}

unsafe extern "system" fn get_ee_version(this: *mut c_void, info: *mut VsFixedFileInfo, buffer: *mut u8, buffer_size: i32) -> HResult
{
    guard("GetEEVersion", HResult::E_FAIL, || {
        if info.is_null() {
            return HResult::E_INVALIDARG;
        }
        let runtime = &wrapper(this).runtime;
        let mut file_info = VsFixedFileInfo::default();
        if let Some(version) = runtime.version() {
            file_info.file_version_ms = version.version_ms();
            file_info.file_version_ls = version.version_ls();
        }
        write_out(info, file_info);

        let size = usize::try_from(buffer_size).unwrap_or(0);
        if let Some(dest) = buffer_mut(buffer, size).filter(|dest| !dest.is_empty()) {
            dest[0] = 0;
            if let Some(version) = runtime.runtime_module().version_string.as_deref() {
                let mut source = version.as_bytes().to_vec();
                source.push(0);
                copy_truncated(dest, &source);
            }
        }
        HResult::S_OK
    })
}
