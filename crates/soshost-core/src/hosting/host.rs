//! `IHost`, the root object handed to `SOSInitializeByHost`.

use std::ffi::c_void;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use super::{guard, SymbolServiceWrapper, TargetWrapper};
use crate::com::marshal::write_out;
use crate::com::{ComClass, ComObject, ComObjectBuilder, Guid, HResult};
use crate::error::Result;
use crate::interfaces::{IHOST, ISYMBOL_SERVICE, ITARGET};
use crate::services::Services;

/// `IHost::HostType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HostType
{
    DotnetDump = 0,
    Lldb = 1,
    DbgEng = 2,
    Vs = 3,
}

/// Host-wide services handed out by IID through `GetService`
///
/// Shared by the host and the target wrappers so both return the same
/// objects.
pub(crate) struct ServiceCatalog
{
    services: Services,
    symbol_service: Mutex<Option<ComObject<SymbolServiceWrapper>>>,
}

impl ServiceCatalog
{
    pub(crate) fn new(services: Services) -> Self
    {
        Self {
            services,
            symbol_service: Mutex::new(None),
        }
    }

    /// The symbol service wrapper, created on first use
    pub(crate) fn symbol_service(&self) -> Result<ComObject<SymbolServiceWrapper>>
    {
        let mut cached = self.symbol_service.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(wrapper) = cached.as_ref() {
            return Ok(wrapper.clone());
        }
        let wrapper = SymbolServiceWrapper::create(self.services.clone())?;
        *cached = Some(wrapper.clone());
        Ok(wrapper)
    }

    /// Interface pointer for `iid` carrying a reference for the caller
    pub(crate) fn get_service(&self, iid: &Guid) -> std::result::Result<*mut c_void, HResult>
    {
        if *iid == ISYMBOL_SERVICE.iid {
            let wrapper = self.symbol_service().map_err(|err| HResult::from(&err))?;
            return wrapper.to_raw(iid).ok_or(HResult::E_NOINTERFACE);
        }
        trace!(%iid, "GetService: no such service");
        Err(HResult::E_NOINTERFACE)
    }

    fn clear(&self)
    {
        self.symbol_service.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// `IHost`
pub struct HostWrapper
{
    services: Services,
    catalog: Arc<ServiceCatalog>,
    target: Mutex<Option<ComObject<TargetWrapper>>>,
}

impl ComClass for HostWrapper
{
    fn destroy(&mut self)
    {
        debug!("HostWrapper destroyed");
        self.target.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.catalog.clear();
    }
}

impl HostWrapper
{
    /// ## Errors
    ///
    /// - `Com`: the vtable does not match the interface description
    pub fn create(services: Services) -> Result<ComObject<Self>>
    {
        let catalog = Arc::new(ServiceCatalog::new(services.clone()));
        let mut builder = ComObjectBuilder::new(Self {
            services,
            catalog,
            target: Mutex::new(None),
        });
        let mut vtable = builder.add_interface(&IHOST, true);
        vtable
            .add_method(get_host_type as GetHostType)
            .add_method(get_service as GetService)
            .add_method(get_current_target as GetCurrentTarget);
        vtable.complete()?;
        Ok(builder.finish())
    }

    pub fn host_type(&self) -> HostType
    {
        HostType::DotnetDump
    }

    /// The target wrapper, created on first use
    ///
    /// ## Errors
    ///
    /// - `Com`: building the wrapper failed
    pub fn target(&self) -> Result<ComObject<TargetWrapper>>
    {
        let mut cached = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(target) = cached.as_ref() {
            return Ok(target.clone());
        }
        let target = TargetWrapper::create(self.services.clone(), Arc::clone(&self.catalog))?;
        *cached = Some(target.clone());
        Ok(target)
    }

    /// The symbol service wrapper shared with the target
    ///
    /// ## Errors
    ///
    /// - `Com`: building the wrapper failed
    pub fn symbol_service(&self) -> Result<ComObject<SymbolServiceWrapper>>
    {
        self.catalog.symbol_service()
    }
}

type GetHostType = unsafe extern "system" fn(*mut c_void) -> HostType;
type GetService = unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult;
type GetCurrentTarget = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;

unsafe fn wrapper<'a>(this: *mut c_void) -> &'a HostWrapper
{
    ComObject::<HostWrapper>::from_this(this)
}

unsafe extern "system" fn get_host_type(this: *mut c_void) -> HostType
{
    guard("GetHostType", HostType::DotnetDump, || wrapper(this).host_type())
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

unsafe extern "system" fn get_current_target(this: *mut c_void, target: *mut *mut c_void) -> HResult
{
    guard("GetCurrentTarget", HResult::E_FAIL, || {
        if target.is_null() {
            return HResult::E_INVALIDARG;
        }
        write_out(target, ptr::null_mut());
        match wrapper(this).target() {
            Ok(object) => match object.to_raw(&ITARGET.iid) {
                Some(interface) => {
                    write_out(target, interface);
                    HResult::S_OK
                }
                None => HResult::E_NOINTERFACE,
            },
            Err(err) => HResult::from(&err),
        }
    })
}
