//! `ITarget`, the process SOS is looking at.

use std::ffi::{c_char, c_void, CString};
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::host::ServiceCatalog;
use super::{guard, RuntimeWrapper};
use crate::com::marshal::write_out;
use crate::com::{ComClass, ComObject, ComObjectBuilder, Guid, HResult};
use crate::error::{HostError, Result};
use crate::interfaces::{IRUNTIME, ITARGET};
use crate::services::runtime::directory_with_separator;
use crate::services::{FlushToken, Services};
use crate::types::OperatingSystem;

/// Runtime wrapper cache, emptied by the flush subscription
#[derive(Default)]
struct TargetState
{
    runtime: Mutex<Option<ComObject<RuntimeWrapper>>>,
}

impl TargetState
{
    fn flush(&self)
    {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// `ITarget` over the session's [`Target`](crate::services::Target)
pub struct TargetWrapper
{
    services: Services,
    catalog: Arc<ServiceCatalog>,
    state: Arc<TargetState>,
    flush_token: FlushToken,
    temp_directory: CString,
}

impl ComClass for TargetWrapper
{
    fn destroy(&mut self)
    {
        debug!("TargetWrapper destroyed");
        self.services.target.flush_event().unregister(self.flush_token);
        self.state.flush();
    }
}

impl TargetWrapper
{
    /// ## Errors
    ///
    /// - `Com`: the vtable does not match the interface description
    pub(crate) fn create(services: Services, catalog: Arc<ServiceCatalog>) -> Result<ComObject<Self>>
    {
        let temp_directory = directory_with_separator(&services.target.temp_directory());
        // A path with an interior NUL cannot be handed out; report an empty one.
        let temp_directory = CString::new(temp_directory).unwrap_or_default();

        let state = Arc::new(TargetState::default());
        let flushed = Arc::clone(&state);
        let flush_token = services.target.flush_event().register(move || flushed.flush());

        let mut builder = ComObjectBuilder::new(Self {
            services,
            catalog,
            state,
            flush_token,
            temp_directory,
        });
        let mut vtable = builder.add_interface(&ITARGET, true);
        vtable
            .add_method(get_operating_system as GetOperatingSystem)
            .add_method(get_service as GetService)
            .add_method(get_temp_directory as GetTempDirectory)
            .add_method(get_runtime as GetRuntime)
            .add_method(flush as Flush);
        if let Err(err) = vtable.complete() {
            builder.get().services.target.flush_event().unregister(builder.get().flush_token);
            return Err(err.into());
        }
        Ok(builder.finish())
    }

    /// Wrapper for the context's current runtime
    ///
    /// The wrapper is reused while the context keeps returning the same
    /// runtime and dropped on flush.
    ///
    /// ## Errors
    ///
    /// - `NotSupported`: the target has no CLR loaded
    /// - `Com`: building the wrapper failed
    pub fn runtime(&self) -> Result<ComObject<RuntimeWrapper>>
    {
        let Some(runtime) = self.services.context.current_runtime() else {
            return Err(HostError::NotSupported("no .NET runtime found in the target".to_string()));
        };
        let mut cached = self.state.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(wrapper) = cached.as_ref().filter(|wrapper| Arc::ptr_eq(wrapper.runtime(), &runtime)) {
            return Ok(wrapper.clone());
        }
        let wrapper = RuntimeWrapper::create(self.services.clone(), runtime)?;
        *cached = Some(wrapper.clone());
        Ok(wrapper)
    }

    pub fn has_cached_runtime(&self) -> bool
    {
        self.state.runtime.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

type GetOperatingSystem = unsafe extern "system" fn(*mut c_void) -> OperatingSystem;
type GetService = unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult;
type GetTempDirectory = unsafe extern "system" fn(*mut c_void) -> *const c_char;
type GetRuntime = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;
type Flush = unsafe extern "system" fn(*mut c_void);

unsafe fn wrapper<'a>(this: *mut c_void) -> &'a TargetWrapper
{
    ComObject::<TargetWrapper>::from_this(this)
}

unsafe extern "system" fn get_operating_system(this: *mut c_void) -> OperatingSystem
{
    guard("GetOperatingSystem", OperatingSystem::Unknown, || wrapper(this).services.target.operating_system())
}

unsafe extern "system" fn get_service(this: *mut c_void, iid: *const Guid, service: *mut *mut c_void) -> HResult
{
    guard("GetService", HResult::E_FAIL, || {
        if service.is_null() || iid.is_null() {
            return HResult::E_INVALIDARG;
        }
        match wrapper(this).catalog.get_service(&*iid) {
            Ok(interface) => {
                write_out(service, interface);
                HResult::S_OK
            }
            Err(hr) => {
                write_out(service, ptr::null_mut());
                hr
            }
        }
    })
}

unsafe extern "system" fn get_temp_directory(this: *mut c_void) -> *const c_char
{
    guard("GetTempDirectory", ptr::null(), || wrapper(this).temp_directory.as_ptr())
}

unsafe extern "system" fn get_runtime(this: *mut c_void, runtime: *mut *mut c_void) -> HResult
{
    guard("GetRuntime", HResult::E_FAIL, || {
        if runtime.is_null() {
            return HResult::E_INVALIDARG;
        }
        write_out(runtime, ptr::null_mut());
        match wrapper(this).runtime() {
            Ok(object) => match object.to_raw(&IRUNTIME.iid) {
                Some(interface) => {
                    write_out(runtime, interface);
                    HResult::S_OK
                }
                None => HResult::E_NOINTERFACE,
            },
            Err(err) => {
                debug!(error = %err, "GetRuntime FAILED");
                HResult::E_NOINTERFACE
            }
        }
    })
}

unsafe extern "system" fn flush(this: *mut c_void)
{
    guard("Flush", (), || wrapper(this).services.target.flush());
}
