//! `ISymbolService`, symbol store access for native SOS.

use std::ffi::{c_char, c_void, CString};
use std::ptr;

use tracing::{debug, error, info, trace};

use super::{guard, metadata, HandleTable, RuntimeConfiguration};
use crate::com::marshal::{alloc_bstr, buffer, read_cstr, read_wstr, write_out};
use crate::com::{ComClass, ComObject, ComObjectBuilder, HResult};
use crate::error::Result;
use crate::interfaces::ISYMBOL_SERVICE;
use crate::services::symbols::keys::{elf_keys, file_name, macho_keys, pe_identity_key};
use crate::services::symbols::read_image_identity;
use crate::services::{
    ImageFormat, KeyTypeFlags, Services, SymbolReader, SymbolReaderRequest, SymbolServer, SymbolStoreKey,
};
use crate::types::Address;

/// `BOOL`
type Bool = i32;

/// `WriteLine` callback of `DisplaySymbolStore`
type WriteLine = unsafe extern "system" fn(*const c_char);
/// `(parameter, moduleFileName, symbolFilePath)`
type SymbolFileCallback = unsafe extern "system" fn(*mut c_void, *const c_char, *const c_char);

/// Windows debugger default symbol path, which means "the public server" here
const DEFAULT_SYMBOL_PATH: &str = "srv*";
const DEFAULT_SYMBOL_PATH_EXPANSION: &str = "cache*;SRV*https://msdl.microsoft.com/download/symbols";

/// `ISymbolService` over the session's [`SymbolService`](crate::services::SymbolService)
///
/// Symbol readers opened for SOS live in a [`HandleTable`]; SOS holds the
/// token until it calls `Dispose`.
pub struct SymbolServiceWrapper
{
    services: Services,
    readers: HandleTable<Box<dyn SymbolReader>>,
}

impl ComClass for SymbolServiceWrapper
{
    fn destroy(&mut self)
    {
        debug!(open_readers = self.readers.len(), "SymbolServiceWrapper destroyed");
        self.readers.clear();
    }
}

impl SymbolServiceWrapper
{
    /// ## Errors
    ///
    /// - `Com`: the vtable does not match the interface description
    pub fn create(services: Services) -> Result<ComObject<Self>>
    {
        let mut builder = ComObjectBuilder::new(Self {
            services,
            readers: HandleTable::new(),
        });
        let mut vtable = builder.add_interface(&ISYMBOL_SERVICE, true);
        vtable
            .add_method(is_symbol_store_enabled as IsSymbolStoreEnabled)
            .add_method(initialize_symbol_store as InitializeSymbolStore)
            .add_method(parse_symbol_path as ParseSymbolPath)
            .add_method(display_symbol_store as DisplaySymbolStore)
            .add_method(disable_symbol_store as DisableSymbolStore)
            .add_method(load_native_symbols as LoadNativeSymbols)
            .add_method(load_native_symbols_from_index as LoadNativeSymbolsFromIndex)
            .add_method(load_symbols_for_module as LoadSymbolsForModule)
            .add_method(dispose as Dispose)
            .add_method(resolve_sequence_point as ResolveSequencePoint)
            .add_method(get_local_variable_name as GetLocalVariableName)
            .add_method(get_line_by_il_offset as GetLineByIlOffset)
            .add_method(get_expression_value as GetExpressionValue)
            .add_method(get_metadata_locator as GetMetadataLocator)
            .add_method(get_icordebug_metadata_locator as GetICorDebugMetadataLocator);
        vtable.complete()?;
        Ok(builder.finish())
    }

    /// Number of symbol readers SOS has not disposed yet
    pub fn open_readers(&self) -> usize
    {
        self.readers.len()
    }

    /// `InitializeSymbolStore`; a server added without a cache gets the default cache
    pub fn initialize_symbol_store(
        &self,
        server: Option<SymbolServer>,
        cache_path: Option<String>,
        directory_path: Option<String>,
    ) -> bool
    {
        let symbols = &self.services.symbols;
        let mut cache_path = cache_path;
        if let Some(server) = server {
            if cache_path.is_none() {
                cache_path = Some(symbols.default_symbol_cache().to_string_lossy().into_owned());
            }
            if let Err(err) = symbols.add_symbol_server(&server) {
                error!(error = %err, "adding symbol server FAILED");
                return false;
            }
        }
        if let Some(cache) = cache_path {
            symbols.add_cache_path(&cache);
        }
        if let Some(directory) = directory_path {
            symbols.add_directory_path(&directory);
        }
        true
    }

    /// `ParseSymbolPath`, with the debugger default `srv*` mapped to the public server
    pub fn parse_symbol_path(&self, symbol_path: &str) -> bool
    {
        if symbol_path.trim().is_empty() {
            return false;
        }
        let symbol_path = if symbol_path.to_lowercase() == DEFAULT_SYMBOL_PATH {
            DEFAULT_SYMBOL_PATH_EXPANSION
        } else {
            symbol_path
        };
        self.services.symbols.parse_symbol_path(symbol_path)
    }

    /// Keys for the native symbols and runtime companions of a loaded module
    fn native_symbol_keys(&self, config: RuntimeConfiguration, path: &str, address: Address) -> Vec<SymbolStoreKey>
    {
        let format = match config {
            RuntimeConfiguration::UnixCore => ImageFormat::Elf,
            RuntimeConfiguration::OSXCore => ImageFormat::MachO,
            RuntimeConfiguration::WindowsCore | RuntimeConfiguration::WindowsDesktop => ImageFormat::Pe,
            RuntimeConfiguration::Unknown => {
                error!(?config, "LoadNativeSymbols: unsupported config");
                return Vec::new();
            }
        };
        match read_image_identity(self.services.memory.as_ref(), format, address) {
            Some(identity) => identity.keys(KeyTypeFlags::SYMBOL_KEY | KeyTypeFlags::DAC_DBI_KEYS, path),
            None => {
                error!(module = path, %address, "module headers unreadable");
                Vec::new()
            }
        }
    }

    /// Download every key and report each file found through `callback`
    fn download_keys(&self, keys: &[SymbolStoreKey], callback: SymbolFileCallback, parameter: *mut c_void)
    {
        for key in keys {
            let module_file_name = file_name(&key.full_path);
            trace!(path = %key.full_path, index = %key.index, "symbol key");
            let Some(local_path) = self.services.symbols.download_file(key) else {
                continue;
            };
            info!(module = module_file_name, path = %local_path.display(), "symbol file found");
            let (Ok(module), Ok(local)) = (CString::new(module_file_name), CString::new(local_path.to_string_lossy().as_bytes())) else {
                continue;
            };
            // SAFETY: both strings outlive the call; SOS copies what it keeps.
            unsafe { callback(parameter, module.as_ptr(), local.as_ptr()) };
        }
    }

    /// Copy `size` bytes at `address` out of the target, `None` for address 0
    fn read_image(&self, address: u64, size: u32) -> Option<Vec<u8>>
    {
        if address == 0 {
            return None;
        }
        let mut image = vec![0u8; size as usize];
        match self.services.memory.read_memory(self.services.mask(address), &mut image) {
            Ok(read) => {
                image.truncate(read);
                Some(image)
            }
            Err(err) => {
                debug!(error = %err, "in-memory image unreadable");
                None
            }
        }
    }
}

/// Parse the hex expressions SOS hands the host (`0x` prefixes are ignored)
pub fn parse_expression_value(expression: &str) -> u64
{
    u64::from_str_radix(expression.replace("0x", "").trim(), 16).unwrap_or(0)
}

fn runtime_configuration(value: i32) -> RuntimeConfiguration
{
    RuntimeConfiguration::from_raw(value)
}

type IsSymbolStoreEnabled = unsafe extern "system" fn(*mut c_void) -> Bool;
type InitializeSymbolStore = unsafe extern "system" fn(
    *mut c_void,
    Bool,
    Bool,
    *const c_char,
    *const c_char,
    i32,
    *const c_char,
    *const c_char,
) -> Bool;
type ParseSymbolPath = unsafe extern "system" fn(*mut c_void, *const c_char) -> Bool;
type DisplaySymbolStore = unsafe extern "system" fn(*mut c_void, Option<WriteLine>);
type DisableSymbolStore = unsafe extern "system" fn(*mut c_void);
type LoadNativeSymbols =
    unsafe extern "system" fn(*mut c_void, Option<SymbolFileCallback>, *mut c_void, i32, *const c_char, u64, u32);
type LoadNativeSymbolsFromIndex = unsafe extern "system" fn(
    *mut c_void,
    Option<SymbolFileCallback>,
    *mut c_void,
    i32,
    *const c_char,
    Bool,
    i32,
    *const u8,
);
type LoadSymbolsForModule = unsafe extern "system" fn(*mut c_void, *const u16, Bool, u64, u32, u64, u32) -> *mut c_void;
type Dispose = unsafe extern "system" fn(*mut c_void, *mut c_void);
type ResolveSequencePoint = unsafe extern "system" fn(*mut c_void, *mut c_void, *const c_char, i32, *mut i32, *mut i32) -> Bool;
type GetLocalVariableName = unsafe extern "system" fn(*mut c_void, *mut c_void, i32, i32, *mut *mut u16) -> Bool;
type GetLineByIlOffset = unsafe extern "system" fn(*mut c_void, *mut c_void, i32, i64, *mut i32, *mut *mut u16) -> Bool;
type GetExpressionValue = unsafe extern "system" fn(*mut c_void, *const c_char) -> u64;
type GetMetadataLocator =
    unsafe extern "system" fn(*mut c_void, *const u16, u32, u32, *const u8, u32, u32, u32, *mut u8, *mut u32) -> HResult;
type GetICorDebugMetadataLocator =
    unsafe extern "system" fn(*mut c_void, *const u16, u32, u32, u32, *mut u32, *mut u16) -> HResult;

unsafe fn wrapper<'a>(this: *mut c_void) -> &'a SymbolServiceWrapper
{
    ComObject::<SymbolServiceWrapper>::from_this(this)
}

unsafe extern "system" fn is_symbol_store_enabled(this: *mut c_void) -> Bool
{
    guard("IsSymbolStoreEnabled", 0, || Bool::from(wrapper(this).services.symbols.is_symbol_store_enabled()))
}

unsafe extern "system" fn initialize_symbol_store(
    this: *mut c_void,
    msdl: Bool,
    symweb: Bool,
    server_path: *const c_char,
    auth_token: *const c_char,
    timeout_minutes: i32,
    cache_path: *const c_char,
    directory_path: *const c_char,
) -> Bool
{
    guard("InitializeSymbolStore", 0, || {
        let url = read_cstr(server_path);
        let server = (msdl != 0 || symweb != 0 || url.is_some()).then(|| SymbolServer {
            msdl: msdl != 0,
            symweb: symweb != 0,
            url,
            auth_token: read_cstr(auth_token),
            timeout_minutes: u32::try_from(timeout_minutes).ok().filter(|minutes| *minutes > 0),
        });
        Bool::from(wrapper(this).initialize_symbol_store(server, read_cstr(cache_path), read_cstr(directory_path)))
    })
}

unsafe extern "system" fn parse_symbol_path(this: *mut c_void, symbol_path: *const c_char) -> Bool
{
    guard("ParseSymbolPath", 0, || {
        let symbol_path = read_cstr(symbol_path).unwrap_or_default();
        Bool::from(wrapper(this).parse_symbol_path(&symbol_path))
    })
}

unsafe extern "system" fn display_symbol_store(this: *mut c_void, write_line: Option<WriteLine>)
{
    guard("DisplaySymbolStore", (), || {
        let Some(write_line) = write_line else {
            return;
        };
        let description = wrapper(this).services.symbols.describe();
        if let Ok(text) = CString::new(description) {
            write_line(text.as_ptr());
        }
    });
}

unsafe extern "system" fn disable_symbol_store(this: *mut c_void)
{
    guard("DisableSymbolStore", (), || wrapper(this).services.symbols.disable_symbol_store());
}

unsafe extern "system" fn load_native_symbols(
    this: *mut c_void,
    callback: Option<SymbolFileCallback>,
    parameter: *mut c_void,
    config: i32,
    module_path: *const c_char,
    address: u64,
    _size: u32,
)
{
    guard("LoadNativeSymbols", (), || {
        let wrapper = wrapper(this);
        if !wrapper.services.symbols.is_symbol_store_enabled() {
            return;
        }
        let (Some(callback), Some(module_path)) = (callback, read_cstr(module_path)) else {
            return;
        };
        let address = wrapper.services.mask(address);
        let keys = wrapper.native_symbol_keys(runtime_configuration(config), &module_path, address);
        wrapper.download_keys(&keys, callback, parameter);
    });
}

unsafe extern "system" fn load_native_symbols_from_index(
    this: *mut c_void,
    callback: Option<SymbolFileCallback>,
    parameter: *mut c_void,
    config: i32,
    module_path: *const c_char,
    special_keys: Bool,
    index_size: i32,
    index: *const u8,
)
{
    guard("LoadNativeSymbolsFromIndex", (), || {
        let wrapper = wrapper(this);
        if !wrapper.services.symbols.is_symbol_store_enabled() {
            return;
        }
        let (Some(callback), Some(module_path)) = (callback, read_cstr(module_path)) else {
            return;
        };
        let Some(id) = buffer(index, usize::try_from(index_size).unwrap_or(0)) else {
            return;
        };
        let flags = if special_keys != 0 { KeyTypeFlags::DAC_DBI_KEYS } else { KeyTypeFlags::IDENTITY_KEY };
        let keys = match runtime_configuration(config) {
            RuntimeConfiguration::UnixCore => elf_keys(flags, &module_path, id),
            RuntimeConfiguration::OSXCore => macho_keys(flags, &module_path, id),
            RuntimeConfiguration::WindowsCore | RuntimeConfiguration::WindowsDesktop => {
                let (Some(timestamp), Some(size)) = (id.get(0..4), id.get(4..8)) else {
                    error!(module = %module_path, "PE index too short");
                    return;
                };
                let timestamp = u32::from_le_bytes([timestamp[0], timestamp[1], timestamp[2], timestamp[3]]);
                let size = u32::from_le_bytes([size[0], size[1], size[2], size[3]]);
                vec![pe_identity_key(&module_path, timestamp, size)]
            }
            RuntimeConfiguration::Unknown => {
                error!(config, "LoadNativeSymbolsFromIndex: unsupported platform");
                return;
            }
        };
        wrapper.download_keys(&keys, callback, parameter);
    });
}

unsafe extern "system" fn load_symbols_for_module(
    this: *mut c_void,
    assembly_path: *const u16,
    is_file_layout: Bool,
    pe_address: u64,
    pe_size: u32,
    pdb_address: u64,
    pdb_size: u32,
) -> *mut c_void
{
    guard("LoadSymbolsForModule", ptr::null_mut(), || {
        let wrapper = wrapper(this);
        let request = SymbolReaderRequest {
            assembly_path: read_wstr(assembly_path),
            is_file_layout: is_file_layout != 0,
            pe_image: wrapper.read_image(pe_address, pe_size),
            pdb_image: wrapper.read_image(pdb_address, pdb_size),
        };
        match wrapper.services.symbols.open_symbol_reader(request) {
            Ok(reader) => wrapper.readers.insert(reader),
            Err(err) => {
                debug!(error = %err, "LoadSymbolsForModule: no reader");
                ptr::null_mut()
            }
        }
    })
}

unsafe extern "system" fn dispose(this: *mut c_void, handle: *mut c_void)
{
    guard("Dispose", (), || {
        drop(wrapper(this).readers.remove(handle));
    });
}

unsafe extern "system" fn resolve_sequence_point(
    this: *mut c_void,
    handle: *mut c_void,
    file_path: *const c_char,
    line: i32,
    method_token: *mut i32,
    il_offset: *mut i32,
) -> Bool
{
    guard("ResolveSequencePoint", 0, || {
        write_out(method_token, 0);
        write_out(il_offset, 0);
        let Some(file_path) = read_cstr(file_path) else {
            return 0;
        };
        let found = wrapper(this)
            .readers
            .with(handle, |reader| reader.resolve_sequence_point(&file_path, line))
            .flatten();
        match found {
            Some((token, offset)) => {
                write_out(method_token, token);
                write_out(il_offset, offset);
                1
            }
            None => 0,
        }
    })
}

unsafe extern "system" fn get_local_variable_name(
    this: *mut c_void,
    handle: *mut c_void,
    method_token: i32,
    index: i32,
    name: *mut *mut u16,
) -> Bool
{
    guard("GetLocalVariableName", 0, || {
        write_out(name, ptr::null_mut());
        let found = wrapper(this)
            .readers
            .with(handle, |reader| reader.local_variable_name(method_token, index))
            .flatten();
        match found {
            Some(local) => Bool::from(write_out(name, alloc_bstr(&local))),
            None => 0,
        }
    })
}

unsafe extern "system" fn get_line_by_il_offset(
    this: *mut c_void,
    handle: *mut c_void,
    method_token: i32,
    il_offset: i64,
    line: *mut i32,
    file_name: *mut *mut u16,
) -> Bool
{
    guard("GetLineByILOffset", 0, || {
        write_out(line, 0);
        write_out(file_name, ptr::null_mut());
        let found = wrapper(this)
            .readers
            .with(handle, |reader| reader.line_by_il_offset(method_token, il_offset))
            .flatten();
        match found {
            Some((number, source)) => {
                write_out(line, number);
                Bool::from(write_out(file_name, alloc_bstr(&source)))
            }
            None => 0,
        }
    })
}

unsafe extern "system" fn get_expression_value(_this: *mut c_void, expression: *const c_char) -> u64
{
    guard("GetExpressionValue", 0, || read_cstr(expression).map_or(0, |text| parse_expression_value(&text)))
}

unsafe extern "system" fn get_metadata_locator(
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
    guard("GetMetadataLocator", HResult::E_FAIL, || {
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

unsafe extern "system" fn get_icordebug_metadata_locator(
    this: *mut c_void,
    image_path: *const u16,
    timestamp: u32,
    size_of_image: u32,
    path_buffer_size: u32,
    needed: *mut u32,
    path_buffer: *mut u16,
) -> HResult
{
    guard("GetICorDebugMetadataLocator", HResult::E_FAIL, || {
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
    fn test_parse_expression_value()
    {
        assert_eq!(parse_expression_value("0x7ffe1234"), 0x7ffe_1234);
        assert_eq!(parse_expression_value("DEADBEEF"), 0xdead_beef);
        assert_eq!(parse_expression_value(" 10 "), 0x10);
        assert_eq!(parse_expression_value("rip"), 0);
        assert_eq!(parse_expression_value(""), 0);
    }

    #[test]
    fn test_runtime_configuration_from_raw()
    {
        assert_eq!(runtime_configuration(2), RuntimeConfiguration::UnixCore);
        assert_eq!(runtime_configuration(3), RuntimeConfiguration::OSXCore);
        assert_eq!(runtime_configuration(-1), RuntimeConfiguration::Unknown);
    }
}
