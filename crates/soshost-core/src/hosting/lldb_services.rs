//! `ILLDBServices` + `ILLDBServices2`, the root command interface.
//!
//! Every SOS command export receives a pointer to this object. It answers
//! the dbgeng-flavoured queries the plugin makes while formatting output:
//! memory, modules, threads, registers and console output. Slots that only
//! make sense inside a real debugger (disassembly, symbol lookup by offset,
//! source files) report "not implemented" with their outputs zeroed.

use std::ffi::{c_char, c_void, CString};
use std::ptr;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace};

use super::symbol_service::parse_expression_value;
use super::{access, guard, unsupported};
use crate::com::marshal::{read_cstr, write_cstr_buffer, write_out};
use crate::com::{ComClass, ComObject, ComObjectBuilder, HResult};
use crate::error::Result;
use crate::interfaces::{ILLDB_SERVICES, ILLDB_SERVICES2};
use crate::services::Services;
use crate::types::{
    Address, ModuleInfo, OperatingSystem, ThreadId, VsFixedFileInfo, INVALID_CHECKSUM, INVALID_TIMESTAMP,
};

/// `DEBUG_CLASS_USER_WINDOWS`
const DEBUG_CLASS_USER_WINDOWS: u32 = 2;
/// `DEBUG_USER_WINDOWS_DUMP`
const DEBUG_USER_WINDOWS_DUMP: u32 = 1026;
/// `SYMOPT_LOAD_LINES`
const SYMOPT_LOAD_LINES: u32 = 0x10;
const PAGE_SIZE: u32 = 4096;
/// Module index meaning "look the module up by base address instead"
const INDEX_BY_BASE: u32 = u32::MAX;

const VERSION_ROOT: &str = "\\";
const VERSION_FILE_VERSION: &str = "\\StringFileInfo\\040904B0\\FileVersion";

/// Win32 `BOOL`
type Bool = i32;

/// `ILLDBServices2::LoadNativeSymbols2` callback
pub type ModuleLoadCallback =
    Option<unsafe extern "system" fn(parameter: *mut c_void, path: *const c_char, base: u64, size: u32)>;

/// Command interface handed to every SOS export
pub struct LldbServices
{
    services: Services,
    /// Last string returned by `GetCoreClrDirectory`, kept alive for the caller
    coreclr_directory: Mutex<Option<CString>>,
}

impl ComClass for LldbServices
{
    fn destroy(&mut self)
    {
        debug!("LldbServices destroyed");
    }
}

impl LldbServices
{
    /// ## Errors
    ///
    /// - `Com`: a vtable does not match its interface description
    pub fn create(services: Services) -> Result<ComObject<Self>>
    {
        let mut builder = ComObjectBuilder::new(Self {
            services,
            coreclr_directory: Mutex::new(None),
        });

        let mut vtable = builder.add_interface(&ILLDB_SERVICES, false);
        vtable
            .add_method(get_coreclr_directory as GetCoreClrDirectory)
            .add_method(get_expression as GetExpression)
            .add_method(virtual_unwind as VirtualUnwind)
            .add_method(set_exception_callback as SetExceptionCallback)
            .add_method(clear_exception_callback as ClearExceptionCallback)
            .add_method(get_interrupt as GetInterrupt)
            .add_method(output_va_list as OutputVaList)
            .add_method(get_debuggee_type as GetDebuggeeType)
            .add_method(get_page_size as GetPageSize)
            .add_method(get_executing_processor_type as GetExecutingProcessorType)
            .add_method(execute as Execute)
            .add_method(get_last_event_information as GetLastEventInformation)
            .add_method(disassemble as Disassemble)
            .add_method(get_context_stack_trace as GetContextStackTrace)
            .add_method(read_virtual as ReadVirtual)
            .add_method(write_virtual as WriteVirtual)
            .add_method(get_symbol_options as GetSymbolOptions)
            .add_method(get_name_by_offset as GetNameByOffset)
            .add_method(get_number_modules as GetNumberModules)
            .add_method(get_module_by_index as GetModuleByIndex)
            .add_method(get_module_by_module_name as GetModuleByModuleName)
            .add_method(get_module_by_offset as GetModuleByOffset)
            .add_method(get_module_names as GetModuleNames)
            .add_method(get_line_by_offset as GetLineByOffset)
            .add_method(get_source_file_line_offsets as GetSourceFileLineOffsets)
            .add_method(find_source_file as FindSourceFile)
            .add_method(get_current_process_system_id as GetCurrentProcessSystemId)
            .add_method(get_current_thread_id as GetCurrentThreadId)
            .add_method(set_current_thread_id as SetCurrentThreadId)
            .add_method(get_current_thread_system_id as GetCurrentThreadSystemId)
            .add_method(get_thread_id_by_system_id as GetThreadIdBySystemId)
            .add_method(get_thread_context_by_system_id as GetThreadContextBySystemId)
            .add_method(get_value_by_name as GetValueByName)
            .add_method(get_instruction_offset as GetOffset)
            .add_method(get_stack_offset as GetOffset)
            .add_method(get_frame_offset as GetOffset);
        vtable.complete()?;

        let mut vtable = builder.add_interface(&ILLDB_SERVICES2, false);
        vtable
            .add_method(load_native_symbols2 as LoadNativeSymbols2)
            .add_method(add_module_symbol as AddModuleSymbol)
            .add_method(get_module_info as GetModuleInfo)
            .add_method(get_module_version_information as GetModuleVersionInformation);
        vtable.complete()?;

        Ok(builder.finish())
    }

    pub fn services(&self) -> &Services
    {
        &self.services
    }

    /// Directory of the current runtime module, without a trailing separator
    pub fn coreclr_directory(&self) -> Option<String>
    {
        let runtime = self.services.context.current_runtime()?;
        let directory = runtime.runtime_module().directory()?;
        let trimmed = directory.trim_end_matches(['/', '\\']);
        Some(if trimmed.is_empty() { directory } else { trimmed.to_string() })
    }

    /// The module SOS means by `index`, or by `base` when the index is `u32::MAX`
    fn module_by_index_or_base(&self, index: u32, base: u64) -> Option<ModuleInfo>
    {
        if index == INDEX_BY_BASE {
            self.services.modules.module_from_base_address(Address::new(base))
        } else {
            self.services.modules.module_from_index(index as usize)
        }
    }

    /// Name lookup key: Windows modules are matched by stem plus `.dll`
    fn lookup_name(&self, name: &str) -> String
    {
        if self.services.target.operating_system() == OperatingSystem::Windows {
            let probe = ModuleInfo::new(0, Address::new(0), 0, name);
            format!("{}.dll", probe.module_name())
        } else {
            name.to_string()
        }
    }

    /// dbgeng module name: the stem on Windows, the file name elsewhere
    fn display_name<'a>(&self, module: &'a ModuleInfo) -> &'a str
    {
        if self.services.target.operating_system() == OperatingSystem::Windows {
            module.module_name()
        } else {
            module.short_name()
        }
    }

    /// Value of register `index` on the current thread
    fn current_register(&self, index: Option<usize>) -> Option<u64>
    {
        let thread = self.services.current_thread()?;
        let value = self.services.threads.register_value(thread.thread_id, index?);
        match value {
            Ok(value) => Some(value),
            Err(err) => {
                trace!(thread = %thread.thread_id, error = %err, "register read failed");
                None
            }
        }
    }
}

type GetCoreClrDirectory = unsafe extern "system" fn(*mut c_void) -> *const c_char;
type GetExpression = unsafe extern "system" fn(*mut c_void, *const c_char) -> u64;
type VirtualUnwind = unsafe extern "system" fn(*mut c_void, u32, u32, *mut u8) -> HResult;
type SetExceptionCallback = unsafe extern "system" fn(*mut c_void, *mut c_void) -> HResult;
type ClearExceptionCallback = unsafe extern "system" fn(*mut c_void) -> HResult;
type GetInterrupt = unsafe extern "system" fn(*mut c_void) -> HResult;
type OutputVaList = unsafe extern "system" fn(*mut c_void, u32, *const c_char, *mut c_void) -> HResult;
type GetDebuggeeType = unsafe extern "system" fn(*mut c_void, *mut u32, *mut u32) -> HResult;
type GetPageSize = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type GetExecutingProcessorType = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type Execute = unsafe extern "system" fn(*mut c_void, u32, *const c_char, u32) -> HResult;
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
type Disassemble = unsafe extern "system" fn(*mut c_void, u64, u32, *mut c_char, u32, *mut u32, *mut u64) -> HResult;
type GetContextStackTrace =
    unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut c_void, u32, *mut c_void, u32, u32, *mut u32) -> HResult;
type ReadVirtual = unsafe extern "system" fn(*mut c_void, u64, *mut u8, u32, *mut u32) -> HResult;
type WriteVirtual = unsafe extern "system" fn(*mut c_void, u64, *const u8, u32, *mut u32) -> HResult;
type GetSymbolOptions = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type GetNameByOffset = unsafe extern "system" fn(*mut c_void, u64, *mut c_char, u32, *mut u32, *mut u64) -> HResult;
type GetNumberModules = unsafe extern "system" fn(*mut c_void, *mut u32, *mut u32) -> HResult;
type GetModuleByIndex = unsafe extern "system" fn(*mut c_void, u32, *mut u64) -> HResult;
type GetModuleByModuleName = unsafe extern "system" fn(*mut c_void, *const c_char, u32, *mut u32, *mut u64) -> HResult;
type GetModuleByOffset = unsafe extern "system" fn(*mut c_void, u64, u32, *mut u32, *mut u64) -> HResult;
type GetModuleNames = unsafe extern "system" fn(
    *mut c_void,
    u32,
    u64,
    *mut c_char,
    u32,
    *mut u32,
    *mut c_char,
    u32,
    *mut u32,
    *mut c_char,
    u32,
    *mut u32,
) -> HResult;
type GetLineByOffset =
    unsafe extern "system" fn(*mut c_void, u64, *mut u32, *mut c_char, u32, *mut u32, *mut u64) -> HResult;
type GetSourceFileLineOffsets = unsafe extern "system" fn(*mut c_void, *const c_char, *mut u64, u32, *mut u32) -> HResult;
type FindSourceFile =
    unsafe extern "system" fn(*mut c_void, u32, *const c_char, u32, *mut u32, *mut c_char, u32, *mut u32) -> HResult;
type GetCurrentProcessSystemId = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type GetCurrentThreadId = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type SetCurrentThreadId = unsafe extern "system" fn(*mut c_void, u32) -> HResult;
type GetCurrentThreadSystemId = unsafe extern "system" fn(*mut c_void, *mut u32) -> HResult;
type GetThreadIdBySystemId = unsafe extern "system" fn(*mut c_void, u32, *mut u32) -> HResult;
type GetThreadContextBySystemId = unsafe extern "system" fn(*mut c_void, u32, u32, u32, *mut u8) -> HResult;
type GetValueByName = unsafe extern "system" fn(*mut c_void, *const c_char, *mut usize) -> HResult;
type GetOffset = unsafe extern "system" fn(*mut c_void, *mut u64) -> HResult;

type LoadNativeSymbols2 = unsafe extern "system" fn(*mut c_void, Bool, ModuleLoadCallback) -> HResult;
type AddModuleSymbol = unsafe extern "system" fn(*mut c_void, *mut c_void, *const c_char) -> HResult;
type GetModuleInfo = unsafe extern "system" fn(*mut c_void, u32, *mut u64, *mut u64, *mut u32, *mut u32) -> HResult;
type GetModuleVersionInformation =
    unsafe extern "system" fn(*mut c_void, u32, u64, *const c_char, *mut u8, u32, *mut u32) -> HResult;

unsafe fn wrapper<'a>(this: *mut c_void) -> &'a LldbServices
{
    ComObject::<LldbServices>::from_this(this)
}

unsafe extern "system" fn get_coreclr_directory(this: *mut c_void) -> *const c_char
{
    guard("GetCoreClrDirectory", ptr::null(), || {
        let services = wrapper(this);
        let mut cached = services.coreclr_directory.lock().unwrap_or_else(PoisonError::into_inner);
        *cached = services.coreclr_directory().and_then(|directory| CString::new(directory).ok());
        cached.as_ref().map_or(ptr::null(), |directory| directory.as_ptr())
    })
}

unsafe extern "system" fn get_expression(_this: *mut c_void, text: *const c_char) -> u64
{
    guard("GetExpression", 0, || read_cstr(text).map_or(0, |text| parse_expression_value(&text)))
}

unsafe extern "system" fn virtual_unwind(this: *mut c_void, thread_id: u32, context_size: u32, context: *mut u8) -> HResult
{
    guard("VirtualUnwind", HResult::E_FAIL, || {
        access::virtual_unwind(&wrapper(this).services, thread_id, context_size, context)
    })
}

unsafe extern "system" fn set_exception_callback(_this: *mut c_void, _callback: *mut c_void) -> HResult
{
    HResult::S_OK
}

unsafe extern "system" fn clear_exception_callback(_this: *mut c_void) -> HResult
{
    HResult::S_OK
}

unsafe extern "system" fn get_interrupt(this: *mut c_void) -> HResult
{
    guard("GetInterrupt", HResult::E_FAIL, || {
        if wrapper(this).services.interrupt.is_requested() { HResult::S_OK } else { HResult::E_FAIL }
    })
}

unsafe extern "system" fn output_va_list(this: *mut c_void, _mask: u32, format: *const c_char, _va_list: *mut c_void) -> HResult
{
    guard("OutputVaList", HResult::E_FAIL, || {
        // The plugin formats the text before calling; the argument list is unused.
        if let Some(text) = read_cstr(format) {
            wrapper(this).services.console.write(&text);
        }
        HResult::S_OK
    })
}

unsafe extern "system" fn get_debuggee_type(_this: *mut c_void, class: *mut u32, qualifier: *mut u32) -> HResult
{
    write_out(class, DEBUG_CLASS_USER_WINDOWS);
    write_out(qualifier, DEBUG_USER_WINDOWS_DUMP);
    HResult::S_OK
}

unsafe extern "system" fn get_page_size(_this: *mut c_void, size: *mut u32) -> HResult
{
    write_out(size, PAGE_SIZE);
    HResult::S_OK
}

unsafe extern "system" fn get_executing_processor_type(this: *mut c_void, machine: *mut u32) -> HResult
{
    guard("GetExecutingProcessorType", HResult::E_FAIL, || {
        write_out(machine, wrapper(this).services.target.architecture().image_file_machine());
        HResult::S_OK
    })
}

unsafe extern "system" fn execute(_this: *mut c_void, _output_control: u32, command: *const c_char, _flags: u32) -> HResult
{
    trace!(command = ?read_cstr(command), "Execute is not available");
    HResult::E_NOTIMPL
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn get_last_event_information(
    _this: *mut c_void,
    _event_type: *mut u32,
    _process_id: *mut u32,
    _thread_id: *mut u32,
    _extra_information: *mut c_void,
    _extra_information_size: u32,
    _extra_information_used: *mut u32,
    _description: *mut c_char,
    _description_size: u32,
    _description_used: *mut u32,
) -> HResult
{
    guard("GetLastEventInformation", HResult::E_UNEXPECTED, || unsupported("GetLastEventInformation"))
}

unsafe extern "system" fn disassemble(
    _this: *mut c_void,
    offset: u64,
    _flags: u32,
    buffer: *mut c_char,
    buffer_size: u32,
    disassembly_size: *mut u32,
    end_offset: *mut u64,
) -> HResult
{
    if !buffer.is_null() && buffer_size > 0 {
        *buffer = 0;
    }
    write_out(disassembly_size, 0);
    write_out(end_offset, offset);
    HResult::E_NOTIMPL
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn get_context_stack_trace(
    _this: *mut c_void,
    _start_context: *mut c_void,
    _start_context_size: u32,
    _frames: *mut c_void,
    _frames_size: u32,
    _frame_contexts: *mut c_void,
    _frame_contexts_size: u32,
    _frame_contexts_entry_size: u32,
    frames_filled: *mut u32,
) -> HResult
{
    // No native frames; "clrstack -f" still prints the managed ones.
    write_out(frames_filled, 0);
    HResult::S_OK
}

unsafe extern "system" fn read_virtual(this: *mut c_void, address: u64, buffer: *mut u8, size: u32, bytes_read: *mut u32) -> HResult
{
    guard("ReadVirtual", HResult::E_FAIL, || access::read_virtual(&wrapper(this).services, address, buffer, size, bytes_read))
}

unsafe extern "system" fn write_virtual(
    this: *mut c_void,
    address: u64,
    buffer: *const u8,
    size: u32,
    bytes_written: *mut u32,
) -> HResult
{
    guard("WriteVirtual", HResult::E_FAIL, || {
        access::write_virtual(&wrapper(this).services, address, buffer, size, bytes_written)
    })
}

unsafe extern "system" fn get_symbol_options(_this: *mut c_void, options: *mut u32) -> HResult
{
    write_out(options, SYMOPT_LOAD_LINES);
    HResult::S_OK
}

unsafe extern "system" fn get_name_by_offset(
    _this: *mut c_void,
    _offset: u64,
    name: *mut c_char,
    name_size: u32,
    needed: *mut u32,
    displacement: *mut u64,
) -> HResult
{
    if !name.is_null() && name_size > 0 {
        *name = 0;
    }
    write_out(needed, 0);
    write_out(displacement, 0);
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_number_modules(this: *mut c_void, loaded: *mut u32, unloaded: *mut u32) -> HResult
{
    guard("GetNumberModules", HResult::E_FAIL, || {
        let count = wrapper(this).services.modules.enumerate_modules().len();
        write_out(loaded, u32::try_from(count).unwrap_or(u32::MAX));
        write_out(unloaded, 0);
        HResult::S_OK
    })
}

unsafe extern "system" fn get_module_by_index(this: *mut c_void, index: u32, base: *mut u64) -> HResult
{
    guard("GetModuleByIndex", HResult::E_FAIL, || {
        write_out(base, 0);
        match wrapper(this).services.modules.module_from_index(index as usize) {
            Some(module) => {
                write_out(base, module.image_base.value());
                HResult::S_OK
            }
            None => HResult::E_FAIL,
        }
    })
}

unsafe extern "system" fn get_module_by_module_name(
    this: *mut c_void,
    name: *const c_char,
    start_index: u32,
    index: *mut u32,
    base: *mut u64,
) -> HResult
{
    guard("GetModuleByModuleName", HResult::E_FAIL, || {
        write_out(index, 0);
        write_out(base, 0);
        if start_index != 0 {
            return HResult::E_INVALIDARG;
        }
        let Some(name) = read_cstr(name) else {
            return HResult::E_INVALIDARG;
        };
        let services = wrapper(this);
        let name = services.lookup_name(&name);
        match services.services.modules.modules_by_name(&name).into_iter().next() {
            Some(module) => {
                write_out(index, u32::try_from(module.index).unwrap_or(u32::MAX));
                write_out(base, module.image_base.value());
                HResult::S_OK
            }
            None => {
                trace!(%name, "GetModuleByModuleName: not found");
                HResult::E_FAIL
            }
        }
    })
}

unsafe extern "system" fn get_module_by_offset(
    this: *mut c_void,
    offset: u64,
    start_index: u32,
    index: *mut u32,
    base: *mut u64,
) -> HResult
{
    guard("GetModuleByOffset", HResult::E_FAIL, || {
        write_out(index, 0);
        write_out(base, 0);
        if start_index != 0 {
            return HResult::E_INVALIDARG;
        }
        let services = &wrapper(this).services;
        match services.modules.module_from_address(services.mask(offset)) {
            Some(module) => {
                write_out(index, u32::try_from(module.index).unwrap_or(u32::MAX));
                write_out(base, module.image_base.value());
                HResult::S_OK
            }
            None => HResult::E_FAIL,
        }
    })
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn get_module_names(
    this: *mut c_void,
    index: u32,
    base: u64,
    image_name: *mut c_char,
    image_name_size: u32,
    image_name_needed: *mut u32,
    module_name: *mut c_char,
    module_name_size: u32,
    module_name_needed: *mut u32,
    loaded_image_name: *mut c_char,
    loaded_image_name_size: u32,
    loaded_image_name_needed: *mut u32,
) -> HResult
{
    guard("GetModuleNames", HResult::E_FAIL, || {
        write_out(image_name_needed, 0);
        write_out(module_name_needed, 0);
        write_out(loaded_image_name_needed, 0);
        if !loaded_image_name.is_null() && loaded_image_name_size > 0 {
            *loaded_image_name = 0;
        }

        let services = wrapper(this);
        let Some(module) = services.module_by_index_or_base(index, base) else {
            return HResult::E_FAIL;
        };
        let image = write_cstr_buffer(image_name, image_name_size, image_name_needed, &module.file_name);
        let name = write_cstr_buffer(module_name, module_name_size, module_name_needed, services.display_name(&module));
        if image == HResult::S_FALSE || name == HResult::S_FALSE { HResult::S_FALSE } else { HResult::S_OK }
    })
}

unsafe extern "system" fn get_line_by_offset(
    _this: *mut c_void,
    _offset: u64,
    line: *mut u32,
    file: *mut c_char,
    file_size: u32,
    needed: *mut u32,
    displacement: *mut u64,
) -> HResult
{
    write_out(line, 0);
    if !file.is_null() && file_size > 0 {
        *file = 0;
    }
    write_out(needed, 0);
    write_out(displacement, 0);
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_source_file_line_offsets(
    _this: *mut c_void,
    _file: *const c_char,
    _buffer: *mut u64,
    _buffer_lines: u32,
    file_lines: *mut u32,
) -> HResult
{
    write_out(file_lines, 0);
    HResult::E_NOTIMPL
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn find_source_file(
    _this: *mut c_void,
    _start_element: u32,
    _file: *const c_char,
    _flags: u32,
    found_element: *mut u32,
    buffer: *mut c_char,
    buffer_size: u32,
    found_size: *mut u32,
) -> HResult
{
    write_out(found_element, 0);
    if !buffer.is_null() && buffer_size > 0 {
        *buffer = 0;
    }
    write_out(found_size, 0);
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_current_process_system_id(this: *mut c_void, id: *mut u32) -> HResult
{
    guard("GetCurrentProcessSystemId", HResult::E_FAIL, || match wrapper(this).services.target.process_id() {
        Some(pid) => {
            write_out(id, pid.0);
            HResult::S_OK
        }
        None => {
            write_out(id, 0);
            HResult::E_FAIL
        }
    })
}

unsafe extern "system" fn get_current_thread_id(this: *mut c_void, id: *mut u32) -> HResult
{
    guard("GetCurrentThreadId", HResult::E_FAIL, || match wrapper(this).services.current_thread() {
        Some(thread) => {
            write_out(id, u32::try_from(thread.index).unwrap_or(u32::MAX));
            HResult::S_OK
        }
        None => {
            write_out(id, 0);
            HResult::E_FAIL
        }
    })
}

unsafe extern "system" fn set_current_thread_id(this: *mut c_void, id: u32) -> HResult
{
    guard("SetCurrentThreadId", HResult::E_FAIL, || {
        let services = &wrapper(this).services;
        match services.threads.thread_from_index(id as usize) {
            Some(thread) => {
                services.context.set_current_thread(Some(thread.thread_id));
                HResult::S_OK
            }
            None => HResult::E_FAIL,
        }
    })
}

unsafe extern "system" fn get_current_thread_system_id(this: *mut c_void, system_id: *mut u32) -> HResult
{
    guard("GetCurrentThreadSystemId", HResult::E_FAIL, || match wrapper(this).services.current_thread() {
        Some(thread) => {
            write_out(system_id, thread.thread_id.raw());
            HResult::S_OK
        }
        None => {
            write_out(system_id, 0);
            HResult::E_FAIL
        }
    })
}

unsafe extern "system" fn get_thread_id_by_system_id(this: *mut c_void, system_id: u32, id: *mut u32) -> HResult
{
    guard("GetThreadIdBySystemId", HResult::E_FAIL, || {
        let thread = (system_id != 0)
            .then(|| wrapper(this).services.threads.thread_from_id(ThreadId(system_id)))
            .flatten();
        match thread {
            Some(thread) => {
                write_out(id, u32::try_from(thread.index).unwrap_or(u32::MAX));
                HResult::S_OK
            }
            None => {
                write_out(id, 0);
                HResult::E_FAIL
            }
        }
    })
}

unsafe extern "system" fn get_thread_context_by_system_id(
    this: *mut c_void,
    thread_id: u32,
    _context_flags: u32,
    context_size: u32,
    context: *mut u8,
) -> HResult
{
    guard("GetThreadContextBySystemId", HResult::E_FAIL, || {
        access::thread_context(&wrapper(this).services, thread_id, context_size as usize, context)
    })
}

unsafe extern "system" fn get_value_by_name(this: *mut c_void, name: *const c_char, value: *mut usize) -> HResult
{
    guard("GetValueByName", HResult::E_FAIL, || {
        write_out(value, 0);
        let Some(name) = read_cstr(name) else {
            return HResult::E_INVALIDARG;
        };
        let services = wrapper(this);
        let Some(index) = services.services.threads.register_index(&name) else {
            return HResult::E_INVALIDARG;
        };
        match services.current_register(Some(index)) {
            Some(register) => {
                // Pointer-sized out value; 32-bit hosts only see the low half.
                write_out(value, register as usize);
                HResult::S_OK
            }
            None => HResult::E_FAIL,
        }
    })
}

/// Shared body of the instruction/stack/frame offset slots
unsafe fn register_offset(this: *mut c_void, offset: *mut u64, pick: fn(&LldbServices) -> Option<usize>) -> HResult
{
    write_out(offset, 0);
    let services = wrapper(this);
    match services.current_register(pick(services)) {
        Some(value) => {
            write_out(offset, value);
            HResult::S_OK
        }
        None => HResult::E_FAIL,
    }
}

unsafe extern "system" fn get_instruction_offset(this: *mut c_void, offset: *mut u64) -> HResult
{
    guard("GetInstructionOffset", HResult::E_FAIL, || {
        register_offset(this, offset, |services| services.services.threads.registers().instruction_pointer_index())
    })
}

unsafe extern "system" fn get_stack_offset(this: *mut c_void, offset: *mut u64) -> HResult
{
    guard("GetStackOffset", HResult::E_FAIL, || {
        register_offset(this, offset, |services| services.services.threads.registers().stack_pointer_index())
    })
}

unsafe extern "system" fn get_frame_offset(this: *mut c_void, offset: *mut u64) -> HResult
{
    guard("GetFrameOffset", HResult::E_FAIL, || {
        register_offset(this, offset, |services| services.services.threads.registers().frame_pointer_index())
    })
}

unsafe extern "system" fn load_native_symbols2(this: *mut c_void, runtime_only: Bool, callback: ModuleLoadCallback) -> HResult
{
    guard("LoadNativeSymbols2", HResult::E_FAIL, || {
        let Some(callback) = callback else {
            return HResult::E_INVALIDARG;
        };
        let services = &wrapper(this).services;
        let modules = if runtime_only != 0 {
            services.modules.modules_by_name(services.target.runtime_module_name())
        } else {
            services.modules.enumerate_modules()
        };
        for module in modules {
            let Ok(path) = CString::new(module.file_name.as_str()) else {
                continue;
            };
            callback(
                ptr::null_mut(),
                path.as_ptr(),
                module.image_base.value(),
                u32::try_from(module.image_size).unwrap_or(u32::MAX),
            );
        }
        HResult::S_OK
    })
}

unsafe extern "system" fn add_module_symbol(_this: *mut c_void, _parameter: *mut c_void, symbol_file: *const c_char) -> HResult
{
    trace!(file = ?read_cstr(symbol_file), "AddModuleSymbol ignored");
    HResult::S_OK
}

unsafe extern "system" fn get_module_info(
    this: *mut c_void,
    index: u32,
    base: *mut u64,
    size: *mut u64,
    timestamp: *mut u32,
    checksum: *mut u32,
) -> HResult
{
    guard("GetModuleInfo", HResult::E_FAIL, || {
        let Some(module) = wrapper(this).services.modules.module_from_index(index as usize) else {
            return HResult::E_FAIL;
        };
        write_out(base, module.image_base.value());
        write_out(size, module.image_size);
        write_out(timestamp, module.timestamp.unwrap_or(INVALID_TIMESTAMP));
        write_out(checksum, module.checksum.unwrap_or(INVALID_CHECKSUM));
        HResult::S_OK
    })
}

unsafe extern "system" fn get_module_version_information(
    this: *mut c_void,
    index: u32,
    base: u64,
    item: *const c_char,
    buffer: *mut u8,
    buffer_size: u32,
    version_info_size: *mut u32,
) -> HResult
{
    guard("GetModuleVersionInformation", HResult::E_FAIL, || {
        let Some(item) = read_cstr(item) else {
            return HResult::E_INVALIDARG;
        };
        if buffer.is_null() || buffer_size == 0 {
            return HResult::E_INVALIDARG;
        }
        let Some(module) = wrapper(this).module_by_index_or_base(index, base) else {
            return HResult::E_FAIL;
        };

        match item.as_str() {
            VERSION_ROOT => {
                let size = std::mem::size_of::<VsFixedFileInfo>();
                write_out(version_info_size, size as u32);
                if (buffer_size as usize) < size {
                    return HResult::E_INVALIDARG;
                }
                let Some(version) = module.version else {
                    return HResult::E_FAIL;
                };
                ptr::write_unaligned(buffer.cast::<VsFixedFileInfo>(), VsFixedFileInfo::from_version(version));
                HResult::S_OK
            }
            VERSION_FILE_VERSION => {
                *buffer = 0;
                let Some(version) = module.version_string.as_deref() else {
                    return HResult::E_FAIL;
                };
                // Truncated text is still terminated; the caller only parses the prefix.
                write_cstr_buffer(buffer.cast::<c_char>(), buffer_size, version_info_size, version);
                HResult::S_OK
            }
            _ => HResult::E_INVALIDARG,
        }
    })
}
