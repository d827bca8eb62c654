//! # SOS Host
//!
//! The single owner of one hosting session: the services of the target,
//! the root `ILLDBServices` object handed to every command, the `IHost`
//! wrapper handed to the initializer, and the loaded SOS module.
//!
//! ## Lifecycle
//!
//! 1. Create a host: [`SosHost::new`] over existing services, or
//!    [`SosHost::attach`] to a live process
//! 2. Run commands: [`SosHost::execute_command`] (the module is loaded and
//!    initialized by the first command)
//! 3. Drop: the module is shut down and unloaded before the COM objects it
//!    may still reference are released
//!
//! ## Thread Safety
//!
//! Commands run one at a time (`&mut self`). The plugin may call back into
//! the adapters from other threads; those only share the `Send + Sync`
//! services.

use tracing::{debug, info, warn};

use crate::com::ComObject;
use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::hosting::{HostWrapper, LldbServices};
use crate::interfaces::{IHOST, ILLDB_SERVICES};
use crate::loader::SosLibrary;
use crate::platform::{self, LiveTarget};
use crate::services::{InterruptToken, Services};

/// Command run when no command line is given
const DEFAULT_COMMAND: &str = "Help";

/// One hosting session over one target
pub struct SosHost
{
    // Dropped first: the module must be gone before the objects it holds.
    library: SosLibrary,
    lldb: ComObject<LldbServices>,
    host: ComObject<HostWrapper>,
    services: Services,
    symbol_path: Option<String>,
}

impl SosHost
{
    /// Host over an existing service set
    ///
    /// ## Errors
    ///
    /// - `Com`: an adapter's interface table could not be built
    pub fn new(services: Services, config: &HostConfig) -> Result<Self>
    {
        let lldb = LldbServices::create(services.clone())?;
        let host = HostWrapper::create(services.clone())?;
        debug!(sos_directory = %config.sos_directory().display(), "host created");
        Ok(Self {
            library: SosLibrary::new(config.sos_directory()),
            lldb,
            host,
            services,
            symbol_path: config.symbol_path().map(str::to_string),
        })
    }

    /// Attach to a live process and host over it
    ///
    /// ## Errors
    ///
    /// - any attach error of [`platform::open_process`]
    /// - `Com`: see [`SosHost::new`]
    pub fn attach(pid: u32, config: &HostConfig) -> Result<Self>
    {
        let mode = config.attach_mode();
        let reader = platform::open_process(pid, mode)?;
        info!(pid, ?mode, "attached");
        let target = LiveTarget::new(reader, config.temp_directory());
        Self::new(target.into_services(config), config)
    }

    /// Run one SOS command line, `"name arguments"`
    ///
    /// `None` runs `Help`. The module is loaded on the first call and the
    /// configured symbol path is applied once it is up.
    ///
    /// ## Errors
    ///
    /// - `LibraryLoad`, `EntryPointNotFound`, `InitializationFailed`: the module could not start
    /// - `EntryPointNotFound`: no export named after the command
    /// - `CommandNotFound`: the command export returned `E_NOTIMPL`
    /// - `CommandFailed`: the command returned any other failure
    pub fn execute_command(&mut self, command_line: Option<&str>) -> Result<()>
    {
        let (command, arguments) = split_command_line(command_line);
        if command.is_empty() {
            return Err(HostError::InvalidArgument("empty command".to_string()));
        }
        self.initialize()?;

        let services = self
            .lldb
            .interface(&ILLDB_SERVICES.iid)
            .ok_or_else(|| HostError::NotSupported("ILLDBServices".to_string()))?;
        self.services.interrupt.clear();
        self.library.execute_command(services, command, arguments)
    }

    /// Load and initialize the module if that has not happened yet
    ///
    /// ## Errors
    ///
    /// See [`SosLibrary::initialize`].
    pub fn initialize(&mut self) -> Result<()>
    {
        if self.library.is_initialized() {
            return Ok(());
        }
        let host = self
            .host
            .interface(&IHOST.iid)
            .ok_or_else(|| HostError::NotSupported("IHost".to_string()))?;
        self.library.initialize(host)?;

        if let Some(symbol_path) = self.symbol_path.take() {
            let symbol_service = self.host.symbol_service()?;
            if !symbol_service.parse_symbol_path(&symbol_path) {
                warn!(symbol_path, "invalid symbol path");
            }
        }
        Ok(())
    }

    /// Documentation of `command` from the module's help file
    ///
    /// ## Errors
    ///
    /// See [`SosLibrary::help_text`].
    pub fn help_text(&self, command: &str) -> Result<String>
    {
        self.library.help_text(command)
    }

    /// Drop every cached view of the target (modules, runtime, DAC/DBI)
    pub fn flush(&self)
    {
        self.services.target.flush();
    }

    pub fn services(&self) -> &Services
    {
        &self.services
    }

    /// Token a Ctrl+C handler can trip to interrupt the running command
    pub fn interrupt_token(&self) -> InterruptToken
    {
        self.services.interrupt.clone()
    }

    pub fn is_initialized(&self) -> bool
    {
        self.library.is_initialized()
    }
}

/// Split at the first whitespace; arguments are trimmed
pub fn split_command_line(command_line: Option<&str>) -> (&str, &str)
{
    let Some(line) = command_line else {
        return (DEFAULT_COMMAND, "");
    };
    let line = line.trim_start();
    match line.split_once(char::is_whitespace) {
        Some((command, arguments)) => (command, arguments.trim()),
        None => (line.trim_end(), ""),
    }
}

impl std::fmt::Debug for SosHost
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("SosHost")
            .field("library", &self.library)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_split_command_line()
    {
        assert_eq!(split_command_line(None), ("Help", ""));
        assert_eq!(split_command_line(Some("clrstack")), ("clrstack", ""));
        assert_eq!(split_command_line(Some("dumpheap -stat  ")), ("dumpheap", "-stat"));
        assert_eq!(split_command_line(Some("  dso\t-verify")), ("dso", "-verify"));
        assert_eq!(split_command_line(Some("")), ("", ""));
    }
}
