//! # Native Module Loader
//!
//! Loads the SOS module and the runtime's DAC and DBI, resolves their
//! exports and invokes them.
//!
//! ## SOS exports
//!
//! - `SOSInitializeByHost(IHost*, IDebuggerServices*)`: called once with the
//!   root host interface
//! - `SOSUninitializeByHost()`: optional, called on shutdown
//! - one export per command, `(ILLDBServices*, const char* args) -> HRESULT`
//!
//! ```rust,ignore
//! let mut sos = SosLibrary::new(config.sos_directory());
//! sos.initialize(host.interface())?;
//! sos.execute_command(services.interface(), "clrstack", "-a")?;
//! ```

use std::ffi::{c_char, c_void, CString};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, error, info, warn};

use crate::com::HResult;
use crate::error::{HostError, Result};
use crate::types::OperatingSystem;

pub mod rid;

/// Initializer export
pub const SOS_INITIALIZE: &str = "SOSInitializeByHost";
/// Uninitializer export
pub const SOS_UNINITIALIZE: &str = "SOSUninitializeByHost";
/// Help text shipped next to the module
pub const HELP_TEXT_FILE: &str = "sosdocsunix.txt";

type SosInitialize = unsafe extern "system" fn(host: *mut c_void, debugger_services: *mut c_void) -> HResult;
type SosUninitialize = unsafe extern "system" fn();
type SosCommand = unsafe extern "system" fn(services: *mut c_void, args: *const c_char) -> HResult;

/// A loaded shared library, unloaded on drop
pub struct NativeLibrary
{
    path: PathBuf,
    // dlopen handle or HMODULE, for exports that want their own module handle.
    handle: usize,
    library: Library,
}

impl NativeLibrary
{
    /// Load the library at `path`
    ///
    /// ## Errors
    ///
    /// - `LibraryLoad`: the loader rejected the file
    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading native library");

        #[cfg(unix)]
        let (library, handle) = {
            use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

            // SAFETY: loading runs the library's initializers; the modules loaded here are SOS, the DAC and DBI.
            let opened = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map_err(|err| load_error(path, &err))?;
            let raw = opened.into_raw();
            // SAFETY: `raw` was just produced by `into_raw` and is owned by nothing else.
            let reopened = unsafe { UnixLibrary::from_raw(raw) };
            (Library::from(reopened), raw as usize)
        };

        #[cfg(windows)]
        let (library, handle) = {
            // SAFETY: see above.
            let library = unsafe { Library::new(path) }.map_err(|err| load_error(path, &err))?;
            (library, windows_module_handle(path))
        };

        Ok(Self {
            path: path.to_path_buf(),
            handle,
            library,
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Native module handle
    pub fn raw_handle(&self) -> *mut c_void
    {
        self.handle as *mut c_void
    }

    /// Look up export `name` as a function pointer of type `T`
    ///
    /// # Safety
    ///
    /// `T` must be the exact function pointer type of the export, and the
    /// pointer must not be used after this library is dropped.
    pub unsafe fn export<T: Copy>(&self, name: &str) -> Option<T>
    {
        let symbol: libloading::Symbol<'_, T> = self.library.get(name.as_bytes()).ok()?;
        Some(*symbol)
    }
}

impl std::fmt::Debug for NativeLibrary
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("NativeLibrary").field("path", &self.path).finish_non_exhaustive()
    }
}

fn load_error(path: &Path, err: &libloading::Error) -> HostError
{
    HostError::LibraryLoad {
        path: path.display().to_string(),
        message: format!("LoadLibrary({}) FAILED: {}", path.display(), err),
    }
}

#[cfg(windows)]
fn windows_module_handle(path: &Path) -> usize
{
    use windows::core::PCWSTR;
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;

    let wide = crate::com::marshal::to_wide(&path.to_string_lossy());
    // SAFETY: `wide` is NUL-terminated and outlives the call.
    unsafe { GetModuleHandleW(PCWSTR::from_raw(wide.as_ptr())) }.map_or(0, |module| module.0 as usize)
}

/// File name of the SOS module for `os`
///
/// ## Errors
///
/// - `NotSupported`: no SOS build exists for `os`
pub fn sos_file_name(os: OperatingSystem) -> Result<&'static str>
{
    match os {
        OperatingSystem::Windows => Ok("sos.dll"),
        OperatingSystem::Linux => Ok("libsos.so"),
        OperatingSystem::OSX => Ok("libsos.dylib"),
        OperatingSystem::Unknown => Err(HostError::NotSupported(format!(
            "Unsupported operating system: {}",
            std::env::consts::OS
        ))),
    }
}

/// The SOS module and its lifecycle
///
/// `initialize` is idempotent; `shutdown` (also run on drop) calls the
/// uninitializer when the module exports one and unloads it.
pub struct SosLibrary
{
    directory: PathBuf,
    library: Option<NativeLibrary>,
}

impl SosLibrary
{
    pub fn new(directory: impl Into<PathBuf>) -> Self
    {
        Self {
            directory: directory.into(),
            library: None,
        }
    }

    /// Directory the module and its help text are loaded from
    pub fn directory(&self) -> &Path
    {
        &self.directory
    }

    /// Full path of the module for the running host
    ///
    /// ## Errors
    ///
    /// - `NotSupported`: unsupported host operating system
    pub fn module_path(&self) -> Result<PathBuf>
    {
        Ok(self.directory.join(sos_file_name(OperatingSystem::current())?))
    }

    pub fn is_initialized(&self) -> bool
    {
        self.library.is_some()
    }

    /// Load the module and call its initializer with the root host interface
    ///
    /// Does nothing when already initialized. On failure the module is
    /// unloaded again so a later call starts over.
    ///
    /// ## Errors
    ///
    /// - `LibraryLoad`: the module could not be loaded
    /// - `EntryPointNotFound`: no `SOSInitializeByHost` export
    /// - `InitializationFailed`: the initializer returned a failure code
    pub fn initialize(&mut self, host: *mut c_void) -> Result<()>
    {
        if self.library.is_some() {
            return Ok(());
        }
        let path = self.module_path()?;
        let library = NativeLibrary::load(&path).map_err(|err| {
            let message = if OperatingSystem::current() == OperatingSystem::Linux {
                format!(
                    "Problem loading SOS module from {}. Try installing libc6-dev (apt-get install libc6-dev) to work around this problem.",
                    path.display()
                )
            } else {
                format!("Problem loading SOS module from {}", path.display())
            };
            error!(error = %err, "{}", message);
            HostError::LibraryLoad {
                path: path.display().to_string(),
                message,
            }
        })?;

        // SAFETY: the export has the documented initializer signature.
        let initialize = unsafe { library.export::<SosInitialize>(SOS_INITIALIZE) }
            .ok_or_else(|| HostError::EntryPointNotFound(SOS_INITIALIZE.to_string()))?;
        // SAFETY: `host` is a live IHost pointer owned by the caller.
        let hr = unsafe { initialize(host, std::ptr::null_mut()) };
        if hr != HResult::S_OK {
            error!(hresult = %hr, "SOS initialization FAILED");
            return Err(HostError::InitializationFailed(hr));
        }
        info!(path = %path.display(), "SOS initialized");
        self.library = Some(library);
        Ok(())
    }

    /// Invoke command export `command` with the services pointer and `arguments`
    ///
    /// ## Errors
    ///
    /// - `NotInitialized`: [`SosLibrary::initialize`] has not succeeded
    /// - `EntryPointNotFound`: the module has no such export
    /// - `InvalidArgument`: `arguments` contains a NUL byte
    /// - `CommandNotFound`: the export returned `E_NOTIMPL`
    /// - `CommandFailed`: any other failure code
    pub fn execute_command(&self, services: *mut c_void, command: &str, arguments: &str) -> Result<()>
    {
        let library = self.library.as_ref().ok_or(HostError::NotInitialized)?;
        // SAFETY: every command export has the documented command signature.
        let export = unsafe { library.export::<SosCommand>(command) }
            .ok_or_else(|| HostError::EntryPointNotFound(command.to_string()))?;
        let arguments = CString::new(arguments)
            .map_err(|_| HostError::InvalidArgument(format!("arguments of {} contain a NUL byte", command)))?;

        debug!(command, arguments = ?arguments, "executing SOS command");
        // SAFETY: `services` is a live ILLDBServices pointer and `arguments` outlives the call.
        let hr = unsafe { export(services, arguments.as_ptr()) };
        if hr == HResult::E_NOTIMPL {
            return Err(HostError::CommandNotFound(command.to_string()));
        }
        if hr != HResult::S_OK {
            error!(command, hresult = %hr, "SOS command FAILED");
            return Err(HostError::CommandFailed {
                command: command.to_string(),
                hresult: hr,
            });
        }
        Ok(())
    }

    /// Call the uninitializer, if any, and unload the module
    pub fn shutdown(&mut self)
    {
        let Some(library) = self.library.take() else {
            return;
        };
        // SAFETY: the export takes no arguments.
        match unsafe { library.export::<SosUninitialize>(SOS_UNINITIALIZE) } {
            Some(uninitialize) => unsafe { uninitialize() },
            None => warn!("SOS module has no {} export", SOS_UNINITIALIZE),
        }
        debug!(path = %library.path().display(), "SOS module unloaded");
    }

    /// Documentation of `command` from the help text file
    ///
    /// ## Errors
    ///
    /// - `Io`: the help text file cannot be read
    /// - `HelpNotFound`: the file has no section for `command`
    pub fn help_text(&self, command: &str) -> Result<String>
    {
        let text = std::fs::read_to_string(self.directory.join(HELP_TEXT_FILE))?;
        extract_help_text(&text, command)
    }
}

impl Drop for SosLibrary
{
    fn drop(&mut self)
    {
        self.shutdown();
    }
}

impl std::fmt::Debug for SosLibrary
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("SosLibrary")
            .field("directory", &self.directory)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// The section of `text` documenting `command`
///
/// A section starts on the line after `COMMAND: <command>.` and ends before
/// a line holding only `\\`.
///
/// ## Errors
///
/// - `HelpNotFound`: no section for `command`
pub fn extract_help_text(text: &str, command: &str) -> Result<String>
{
    let command = command.to_lowercase();
    let marker = format!("COMMAND: {}.", command);
    let start = text.find(&marker).ok_or_else(|| HostError::HelpNotFound(command.clone()))?;
    let body_start = match text[start..].find('\n') {
        Some(offset) => start + offset + 1,
        None => return Err(HostError::HelpNotFound(command)),
    };

    let body = &text[body_start..];
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "\\\\" {
            return Ok(body[..offset].to_string());
        }
        offset += line.len();
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod tests
{
    use super::*;

    const HELP: &str = "COMMAND: clrstack.\n!ClrStack [-a] [-l]\n\nShows a managed stack trace.\n\\\\\nCOMMAND: dumpheap.\r\n!DumpHeap [-stat]\r\n\\\\\r\nCOMMAND: eeversion.\nPrints the runtime version.\n";

    #[test]
    fn test_extract_help_text()
    {
        assert_eq!(
            extract_help_text(HELP, "ClrStack").ok().as_deref(),
            Some("!ClrStack [-a] [-l]\n\nShows a managed stack trace.\n")
        );
        assert_eq!(extract_help_text(HELP, "dumpheap").ok().as_deref(), Some("!DumpHeap [-stat]\r\n"));
        assert_eq!(extract_help_text(HELP, "eeversion").ok().as_deref(), Some("Prints the runtime version.\n"));
        assert!(matches!(extract_help_text(HELP, "gcroot"), Err(HostError::HelpNotFound(name)) if name == "gcroot"));
    }

    #[test]
    fn test_sos_file_names()
    {
        assert_eq!(sos_file_name(OperatingSystem::Linux).ok(), Some("libsos.so"));
        assert_eq!(sos_file_name(OperatingSystem::Windows).ok(), Some("sos.dll"));
        assert_eq!(sos_file_name(OperatingSystem::OSX).ok(), Some("libsos.dylib"));
        assert!(sos_file_name(OperatingSystem::Unknown).is_err());
    }

    #[test]
    fn test_missing_module_is_library_load_error()
    {
        let mut sos = SosLibrary::new("/nonexistent/soshost/sos");
        let err = sos.initialize(std::ptr::null_mut());
        assert!(matches!(err, Err(HostError::LibraryLoad { .. })));
        assert!(!sos.is_initialized());
        assert!(matches!(sos.execute_command(std::ptr::null_mut(), "clrstack", ""), Err(HostError::NotInitialized)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unknown_command_is_entry_point_not_found()
    {
        let mut sos = SosLibrary::new("/nonexistent/soshost/sos");
        sos.library = Some(NativeLibrary::load("libc.so.6").unwrap());
        assert!(sos.is_initialized());

        let err = sos.execute_command(std::ptr::null_mut(), "nosuchsoscommand", "-a");
        assert!(matches!(err, Err(HostError::EntryPointNotFound(name)) if name == "nosuchsoscommand"));

        sos.shutdown();
        assert!(!sos.is_initialized());
    }
}
