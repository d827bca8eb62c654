//! Slot-level tests of the interface adapters, called the way the native
//! plugin calls them: through the vtable of the handed-out pointer.

mod common;

use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::Arc;

use common::{assert_hr, interface, linux_target, services, slot_index, MockTarget};
use soshost_core::com::marshal::to_wide;
use soshost_core::com::{release, Guid, HResult};
use soshost_core::hosting::{DataTargetWrapper, HostType, HostWrapper, LldbServices};
use soshost_core::interfaces::{
    ICLR_DATA_TARGET, IHOST, ILLDB_SERVICES, ILLDB_SERVICES2, IRUNTIME, ISYMBOL_SERVICE, ITARGET,
};
use soshost_core::types::{Address, Architecture, OperatingSystem};

type ReadVirtual = unsafe extern "system" fn(*mut c_void, u64, *mut u8, u32, *mut u32) -> HResult;
type GetImageBase = unsafe extern "system" fn(*mut c_void, *const u16, *mut u64) -> HResult;
type OutU32 = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type OutU64 = unsafe extern "system" fn(*mut c_void, *mut u64) -> HResult;
type TwoU32 = unsafe extern "system" fn(*mut c_void, *mut u32, *mut u32) -> HResult;
type GetThreadContext = unsafe extern "system" fn(*mut c_void, u32, u32, u32, *mut u8) -> HResult;
type GetTlsValue = unsafe extern "system" fn(*mut c_void, u32, u32, *mut u64) -> HResult;
type NoArgs = unsafe extern "system" fn(*mut c_void) -> HResult;
type ReturnsText = unsafe extern "system" fn(*mut c_void) -> *const c_char;
type OutputVaList = unsafe extern "system" fn(*mut c_void, u32, *const c_char, *mut c_void) -> HResult;
type GetModuleByModuleName = unsafe extern "system" fn(*mut c_void, *const c_char, u32, *mut u32, *mut u64) -> HResult;
type SetCurrentThreadId = unsafe extern "system" fn(*mut c_void, u32) -> HResult;
type GetLastEventInformation = unsafe extern "system" fn(
    *mut c_void,
    *mut u32,
    *mut u32,
    *mut u32,
    *mut c_void,
    u32,
    *mut u32,
    *mut c_char,
    u32,
    *mut u32,
) -> HResult;
type GetModuleInfo = unsafe extern "system" fn(*mut c_void, u32, *mut u64, *mut u64, *mut u32, *mut u32) -> HResult;
type GetHostType = unsafe extern "system" fn(*mut c_void) -> HostType;
type GetService = unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult;
type GetInterfaceOut = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;
type GetOperatingSystem = unsafe extern "system" fn(*mut c_void) -> OperatingSystem;
type Flush = unsafe extern "system" fn(*mut c_void);

fn text(ptr: *const c_char) -> String
{
    assert!(!ptr.is_null());
    // SAFETY: the adapters hand out NUL-terminated strings they keep alive.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

// -- ICLRDataTarget -------------------------------------------------------

#[test]
fn test_data_target_zero_length_read_skips_the_memory_service()
{
    let target = Arc::new(linux_target());
    let (services, _) = services(target.clone());
    let object = DataTargetWrapper::create(services, Address::new(0x7f00_0000_0000)).unwrap();
    let data_target = interface(object.interface(&ICLR_DATA_TARGET.iid).unwrap());

    let mut read = 99u32;
    let read_virtual: ReadVirtual = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "ReadVirtual")) };
    let hr = unsafe { read_virtual(data_target.as_raw(), 0x1000, ptr::null_mut(), 0, &mut read) };
    assert_hr(hr, HResult::S_OK);
    assert_eq!(read, 0);
    assert_eq!(target.read_count(), 0);
}

#[test]
fn test_data_target_reads_sign_extended_addresses_on_32_bit_targets()
{
    let mut target = MockTarget::new(OperatingSystem::Linux, Architecture::X86);
    target.base = 0x8000_0000;
    let target = Arc::new(target);
    let (services, _) = services(target.clone());
    let object = DataTargetWrapper::create(services, Address::new(0x8000_0000)).unwrap();
    let data_target = interface(object.interface(&ICLR_DATA_TARGET.iid).unwrap());
    let read_virtual: ReadVirtual = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "ReadVirtual")) };

    let mut buffer = [0u8; 4];
    let mut read = 0u32;
    let hr = unsafe { read_virtual(data_target.as_raw(), 0xFFFF_FFFF_8000_0010, buffer.as_mut_ptr(), 4, &mut read) };
    assert_hr(hr, HResult::S_OK);
    assert_eq!(read, 4);
    assert_eq!(buffer, [0x10, 0x11, 0x12, 0x13]);

    let mut unmasked = [0u8; 4];
    let hr = unsafe { read_virtual(data_target.as_raw(), 0x8000_0010, unmasked.as_mut_ptr(), 4, &mut read) };
    assert_hr(hr, HResult::S_OK);
    assert_eq!(unmasked, buffer);
}

#[test]
fn test_data_target_read_failure_reports_nothing_read()
{
    let target = Arc::new(linux_target());
    let (services, _) = services(target);
    let object = DataTargetWrapper::create(services, Address::new(0x7f00_0000_0000)).unwrap();
    let data_target = interface(object.interface(&ICLR_DATA_TARGET.iid).unwrap());
    let read_virtual: ReadVirtual = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "ReadVirtual")) };

    let mut buffer = [0u8; 8];
    let mut read = 7u32;
    let hr = unsafe { read_virtual(data_target.as_raw(), 0xdead_0000, buffer.as_mut_ptr(), 8, &mut read) };
    assert_hr(hr, HResult::E_FAIL);
    assert_eq!(read, 0);
}

#[test]
fn test_data_target_describes_the_target()
{
    let target = Arc::new(linux_target());
    let (services, _) = services(target);
    let object = DataTargetWrapper::create(services, Address::new(0x7f00_0000_0000)).unwrap();
    let data_target = interface(object.interface(&ICLR_DATA_TARGET.iid).unwrap());

    let get_machine_type: OutU32 = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "GetMachineType")) };
    let get_pointer_size: OutU32 = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "GetPointerSize")) };
    let get_thread_id: OutU32 = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "GetCurrentThreadID")) };
    let get_tls_value: GetTlsValue = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "GetTLSValue")) };

    let mut value = 0u32;
    assert_hr(unsafe { get_machine_type(data_target.as_raw(), &mut value) }, HResult::S_OK);
    assert_eq!(value, Architecture::X86_64.image_file_machine());
    assert_hr(unsafe { get_pointer_size(data_target.as_raw(), &mut value) }, HResult::S_OK);
    assert_eq!(value, 8);
    assert_hr(unsafe { get_thread_id(data_target.as_raw(), &mut value) }, HResult::S_OK);
    assert_eq!(value, 0x51);

    let mut tls = 0u64;
    assert_hr(unsafe { get_tls_value(data_target.as_raw(), 0x51, 0, &mut tls) }, HResult::E_NOTIMPL);
}

#[test]
fn test_data_target_image_base_by_file_name()
{
    let target = Arc::new(linux_target());
    let (services, _) = services(target);
    let object = DataTargetWrapper::create(services, Address::new(0x7f00_0000_0000)).unwrap();
    let data_target = interface(object.interface(&ICLR_DATA_TARGET.iid).unwrap());
    let get_image_base: GetImageBase = unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "GetImageBase")) };

    let name = to_wide("libcoreclr.so");
    let mut base = 0u64;
    assert_hr(unsafe { get_image_base(data_target.as_raw(), name.as_ptr(), &mut base) }, HResult::S_OK);
    assert_eq!(base, 0x7f00_0000_0000);

    let missing = to_wide("libmissing.so");
    assert_hr(unsafe { get_image_base(data_target.as_raw(), missing.as_ptr(), &mut base) }, HResult::E_FAIL);
    assert_eq!(base, 0);
    assert_hr(unsafe { get_image_base(data_target.as_raw(), ptr::null(), &mut base) }, HResult::E_INVALIDARG);
}

#[test]
fn test_data_target_thread_context_size_rules()
{
    let target = Arc::new(linux_target());
    let full = target.contexts.values().next().unwrap().clone();
    let (services, _) = services(target);
    let object = DataTargetWrapper::create(services, Address::new(0x7f00_0000_0000)).unwrap();
    let data_target = interface(object.interface(&ICLR_DATA_TARGET.iid).unwrap());
    let get_context: GetThreadContext =
        unsafe { data_target.slot(slot_index(&ICLR_DATA_TARGET, "GetThreadContext")) };

    let mut buffer = vec![0u8; full.len() + 16];
    let minimum = Architecture::X86_64.minimum_context_size() as u32;

    let hr = unsafe { get_context(data_target.as_raw(), 0x51, 0, minimum - 1, buffer.as_mut_ptr()) };
    assert_hr(hr, HResult::E_INVALIDARG);
    let hr = unsafe { get_context(data_target.as_raw(), 0x51, 0, full.len() as u32 + 1, buffer.as_mut_ptr()) };
    assert_hr(hr, HResult::E_INVALIDARG);
    assert!(buffer.iter().all(|byte| *byte == 0));

    let hr = unsafe { get_context(data_target.as_raw(), 0x51, 0, full.len() as u32, buffer.as_mut_ptr()) };
    assert_hr(hr, HResult::S_OK);
    assert_eq!(&buffer[..full.len()], full.as_slice());
    assert!(buffer[full.len()..].iter().all(|byte| *byte == 0));

    let hr = unsafe { get_context(data_target.as_raw(), 0x99, 0, full.len() as u32, buffer.as_mut_ptr()) };
    assert_hr(hr, HResult::E_FAIL);
}

// -- ILLDBServices ---------------------------------------------------------

#[test]
fn test_lldb_services_fixed_answers()
{
    let (services, _) = services(Arc::new(linux_target()));
    let object = LldbServices::create(services).unwrap();
    let lldb = interface(object.interface(&ILLDB_SERVICES.iid).unwrap());

    let get_page_size: OutU32 = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetPageSize")) };
    let get_debuggee_type: TwoU32 = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetDebuggeeType")) };
    let get_last_event: GetLastEventInformation =
        unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetLastEventInformation")) };

    let mut page = 0u32;
    assert_hr(unsafe { get_page_size(lldb.as_raw(), &mut page) }, HResult::S_OK);
    assert_eq!(page, 4096);

    let (mut class, mut qualifier) = (0u32, 0u32);
    assert_hr(unsafe { get_debuggee_type(lldb.as_raw(), &mut class, &mut qualifier) }, HResult::S_OK);
    assert_eq!((class, qualifier), (2, 1026));

    let hr = unsafe {
        get_last_event(
            lldb.as_raw(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            0,
            ptr::null_mut(),
            ptr::null_mut(),
            0,
            ptr::null_mut(),
        )
    };
    assert_hr(hr, HResult::E_UNEXPECTED);
}

#[test]
fn test_lldb_services_interrupt_follows_the_token()
{
    let (services, _) = services(Arc::new(linux_target()));
    let token = services.interrupt.clone();
    let object = LldbServices::create(services).unwrap();
    let lldb = interface(object.interface(&ILLDB_SERVICES.iid).unwrap());
    let get_interrupt: NoArgs = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetInterrupt")) };

    assert_hr(unsafe { get_interrupt(lldb.as_raw()) }, HResult::E_FAIL);
    token.request();
    assert_hr(unsafe { get_interrupt(lldb.as_raw()) }, HResult::S_OK);
    token.clear();
    assert_hr(unsafe { get_interrupt(lldb.as_raw()) }, HResult::E_FAIL);
}

#[test]
fn test_lldb_services_output_goes_to_the_console()
{
    let (services, console) = services(Arc::new(linux_target()));
    let object = LldbServices::create(services).unwrap();
    let lldb = interface(object.interface(&ILLDB_SERVICES.iid).unwrap());
    let output: OutputVaList = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "OutputVaList")) };

    assert_hr(unsafe { output(lldb.as_raw(), 1, c"Thread 0x51\n".as_ptr(), ptr::null_mut()) }, HResult::S_OK);
    assert_hr(unsafe { output(lldb.as_raw(), 1, c"done".as_ptr(), ptr::null_mut()) }, HResult::S_OK);
    assert_eq!(console.0.lock().unwrap().as_str(), "Thread 0x51\ndone");
}

#[test]
fn test_lldb_services_coreclr_directory_has_no_trailing_separator()
{
    let (services, _) = services(Arc::new(linux_target()));
    let object = LldbServices::create(services).unwrap();
    let lldb = interface(object.interface(&ILLDB_SERVICES.iid).unwrap());
    let get_directory: ReturnsText = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetCoreClrDirectory")) };

    let directory = text(unsafe { get_directory(lldb.as_raw()) });
    assert_eq!(directory, "/usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0");
}

#[test]
fn test_lldb_services_module_queries()
{
    let (services, _) = services(Arc::new(linux_target()));
    let object = LldbServices::create(services).unwrap();
    let lldb = interface(object.interface(&ILLDB_SERVICES.iid).unwrap());
    let get_number_modules: TwoU32 = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetNumberModules")) };
    let by_name: GetModuleByModuleName = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetModuleByModuleName")) };

    let (mut loaded, mut unloaded) = (0u32, 9u32);
    assert_hr(unsafe { get_number_modules(lldb.as_raw(), &mut loaded, &mut unloaded) }, HResult::S_OK);
    assert_eq!((loaded, unloaded), (2, 0));

    let (mut index, mut base) = (0u32, 0u64);
    let hr = unsafe { by_name(lldb.as_raw(), c"libcoreclr.so".as_ptr(), 0, &mut index, &mut base) };
    assert_hr(hr, HResult::S_OK);
    assert_eq!((index, base), (1, 0x7f00_0000_0000));

    let hr = unsafe { by_name(lldb.as_raw(), c"libcoreclr.so".as_ptr(), 1, &mut index, &mut base) };
    assert_hr(hr, HResult::E_INVALIDARG);
    let hr = unsafe { by_name(lldb.as_raw(), c"libnothing.so".as_ptr(), 0, &mut index, &mut base) };
    assert_hr(hr, HResult::E_FAIL);
    assert_eq!((index, base), (0, 0));
}

#[test]
fn test_lldb_services_module_info_defaults()
{
    let (services, _) = services(Arc::new(linux_target()));
    let object = LldbServices::create(services).unwrap();
    let lldb2 = interface(object.interface(&ILLDB_SERVICES2.iid).unwrap());
    let get_module_info: GetModuleInfo = unsafe { lldb2.slot(slot_index(&ILLDB_SERVICES2, "GetModuleInfo")) };

    let (mut base, mut size, mut timestamp, mut checksum) = (0u64, 0u64, 0u32, 0u32);
    let hr = unsafe { get_module_info(lldb2.as_raw(), 0, &mut base, &mut size, &mut timestamp, &mut checksum) };
    assert_hr(hr, HResult::S_OK);
    assert_eq!((base, size), (0x40_0000, 0x1_0000));
    assert_eq!(timestamp, 0xFFFF_FFFE);
    assert_eq!(checksum, 0xFFFF_FFFF);

    let hr = unsafe { get_module_info(lldb2.as_raw(), 7, &mut base, &mut size, &mut timestamp, &mut checksum) };
    assert_hr(hr, HResult::E_FAIL);
}

#[test]
fn test_lldb_services_registers_and_current_thread()
{
    let (services, _) = services(Arc::new(linux_target()));
    let object = LldbServices::create(services).unwrap();
    let lldb = interface(object.interface(&ILLDB_SERVICES.iid).unwrap());
    let get_ip: OutU64 = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetInstructionOffset")) };
    let get_thread: OutU32 = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetCurrentThreadId")) };
    let get_system_id: OutU32 = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "GetCurrentThreadSystemId")) };
    let set_thread: SetCurrentThreadId = unsafe { lldb.slot(slot_index(&ILLDB_SERVICES, "SetCurrentThreadId")) };

    let mut ip = 0u64;
    assert_hr(unsafe { get_ip(lldb.as_raw(), &mut ip) }, HResult::S_OK);
    assert_eq!(ip, 0x7f00_dead_beef);

    let mut id = 9u32;
    assert_hr(unsafe { get_thread(lldb.as_raw(), &mut id) }, HResult::S_OK);
    assert_eq!(id, 0);
    assert_hr(unsafe { get_system_id(lldb.as_raw(), &mut id) }, HResult::S_OK);
    assert_eq!(id, 0x51);

    assert_hr(unsafe { set_thread(lldb.as_raw(), 0) }, HResult::S_OK);
    assert_hr(unsafe { set_thread(lldb.as_raw(), 5) }, HResult::E_FAIL);
}

// -- IHost / ITarget -------------------------------------------------------

#[test]
fn test_host_identifies_itself_and_serves_symbols()
{
    let (services, _) = services(Arc::new(linux_target()));
    let object = HostWrapper::create(services).unwrap();
    let host = interface(object.interface(&IHOST.iid).unwrap());
    let get_host_type: GetHostType = unsafe { host.slot(slot_index(&IHOST, "GetHostType")) };
    let get_service: GetService = unsafe { host.slot(slot_index(&IHOST, "GetService")) };

    assert_eq!(unsafe { get_host_type(host.as_raw()) } as u32, 0);

    let mut service = ptr::null_mut();
    assert_hr(unsafe { get_service(host.as_raw(), &ISYMBOL_SERVICE.iid, &mut service) }, HResult::S_OK);
    assert!(!service.is_null());
    unsafe { release(service) };

    let mut service = ptr::null_mut();
    let hr = unsafe { get_service(host.as_raw(), &IRUNTIME.iid, &mut service) };
    assert_hr(hr, HResult::E_NOINTERFACE);
    assert!(service.is_null());
    assert_hr(unsafe { get_service(host.as_raw(), &ISYMBOL_SERVICE.iid, ptr::null_mut()) }, HResult::E_INVALIDARG);
}

#[test]
fn test_target_slots()
{
    let (services, _) = services(Arc::new(linux_target()));
    let object = HostWrapper::create(services).unwrap();
    let host = interface(object.interface(&IHOST.iid).unwrap());
    let get_current_target: GetInterfaceOut = unsafe { host.slot(slot_index(&IHOST, "GetCurrentTarget")) };

    let mut raw_target = ptr::null_mut();
    assert_hr(unsafe { get_current_target(host.as_raw(), &mut raw_target) }, HResult::S_OK);
    let target = interface(raw_target);
    // `interface` took its own reference; drop the one the slot handed out.
    unsafe { release(raw_target) };

    let get_os: GetOperatingSystem = unsafe { target.slot(slot_index(&ITARGET, "GetOperatingSystem")) };
    let get_temp: ReturnsText = unsafe { target.slot(slot_index(&ITARGET, "GetTempDirectory")) };
    let get_runtime: GetInterfaceOut = unsafe { target.slot(slot_index(&ITARGET, "GetRuntime")) };
    let flush: Flush = unsafe { target.slot(slot_index(&ITARGET, "Flush")) };

    assert_eq!(unsafe { get_os(target.as_raw()) } as u32, 2);
    let temp = text(unsafe { get_temp(target.as_raw()) });
    assert!(temp.ends_with('/'), "{temp}");
    assert!(temp.starts_with("/tmp/soshost-tests"));

    let mut runtime = ptr::null_mut();
    assert_hr(unsafe { get_runtime(target.as_raw(), &mut runtime) }, HResult::S_OK);
    assert!(!runtime.is_null());
    unsafe { release(runtime) };

    let wrapper = object.target().unwrap();
    assert!(wrapper.has_cached_runtime());
    unsafe { flush(target.as_raw()) };
    assert!(!wrapper.has_cached_runtime());
}

#[test]
fn test_target_without_runtime_has_no_runtime_interface()
{
    let target = MockTarget::new(OperatingSystem::Linux, Architecture::X86_64).with_module(0x40_0000, 0x1000, "/app/app");
    let (services, _) = services(Arc::new(target));
    let host = HostWrapper::create(services).unwrap();
    let target = host.target().unwrap();
    let itarget = interface(target.interface(&ITARGET.iid).unwrap());
    let get_runtime: GetInterfaceOut = unsafe { itarget.slot(slot_index(&ITARGET, "GetRuntime")) };

    let mut runtime = 1usize as *mut c_void;
    assert_hr(unsafe { get_runtime(itarget.as_raw(), &mut runtime) }, HResult::E_NOINTERFACE);
    assert!(runtime.is_null());
}
