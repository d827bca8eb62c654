//! # Services
//!
//! The collaborators the interface adapters consult. Each adapter slot does
//! one thing: translate native arguments, call one of these traits, and
//! translate the result back.
//!
//! ## Why traits?
//!
//! The adapters never know whether they are reading a live process, a
//! snapshot clone or an in-memory fake from a test. Every service is a
//! `Send + Sync` trait object because the plugin calls back from whatever
//! thread it likes.
//!
//! ## Services
//!
//! - [`MemoryService`]: read/write target memory, pointer size
//! - [`ThreadService`]: thread enumeration, contexts, register lookup
//! - [`ModuleService`]: loaded modules by index, address or name
//! - [`Target`]: operating system, architecture, flush subscription
//! - [`ContextService`]: current thread and runtime
//! - [`SymbolService`]: symbol store configuration and lookups
//! - [`ConsoleService`]: plugin output
//! - [`ThreadUnwindService`], [`RemoteMemoryService`]: optional, usually absent

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{HostError, Result};
use crate::types::{Address, Architecture, ModuleInfo, OperatingSystem, ProcessId, ThreadId, ThreadInfo};

pub mod context;
pub mod flush;
pub mod interrupt;
pub mod registers;
pub mod runtime;
pub mod symbols;

pub use context::HostContext;
pub use flush::{FlushEvent, FlushToken};
pub use interrupt::InterruptToken;
pub use registers::{Register, RegisterSet};
pub use runtime::{ClrRuntime, Runtime, RuntimeType};
pub use symbols::{
    ImageFormat, ImageIdentity, KeyTypeFlags, LocalSymbolStore, SymbolReader, SymbolReaderRequest, SymbolServer,
    SymbolService, SymbolStoreKey, MSDL_SYMBOL_SERVER, SYMWEB_SYMBOL_SERVER,
};

/// Target memory access
pub trait MemoryService: Send + Sync
{
    /// Size of a target pointer in bytes (4 or 8)
    fn pointer_size(&self) -> usize;

    /// Mask applied to addresses coming from native callers
    ///
    /// See [`Address::masked`].
    fn sign_extension_mask(&self) -> u64
    {
        Address::sign_extension_mask(self.pointer_size())
    }

    /// Read up to `buffer.len()` bytes, returning how many were read
    ///
    /// ## Errors
    ///
    /// - `ReadFailed`: nothing at `address` could be read
    fn read_memory(&self, address: Address, buffer: &mut [u8]) -> Result<usize>;

    /// Write `data`, returning how many bytes were written
    ///
    /// ## Errors
    ///
    /// - `WriteFailed`: the memory is not writable
    /// - `NotSupported`: the target is read-only (dumps, snapshots)
    fn write_memory(&self, address: Address, data: &[u8]) -> Result<usize>;
}

/// Target threads and their register contexts
pub trait ThreadService: Send + Sync
{
    /// All threads, in a stable index order
    fn enumerate_threads(&self) -> Vec<ThreadInfo>;

    fn thread_from_id(&self, thread_id: ThreadId) -> Option<ThreadInfo>
    {
        self.enumerate_threads().into_iter().find(|thread| thread.thread_id == thread_id)
    }

    fn thread_from_index(&self, index: usize) -> Option<ThreadInfo>
    {
        self.enumerate_threads().into_iter().find(|thread| thread.index == index)
    }

    /// Raw native `CONTEXT` of the thread, laid out for the target architecture
    ///
    /// ## Errors
    ///
    /// - `ThreadNotFound`: no such thread
    /// - `NotSupported`: contexts are unavailable for this target
    fn thread_context(&self, thread_id: ThreadId) -> Result<Vec<u8>>;

    /// Register layout of the contexts returned by [`ThreadService::thread_context`]
    fn registers(&self) -> &'static RegisterSet;

    /// Index of the register called `name` (case-insensitive)
    fn register_index(&self, name: &str) -> Option<usize>
    {
        self.registers().index_of(name)
    }

    /// Value of register `index` in the thread's current context
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no register with that index
    /// - anything [`ThreadService::thread_context`] returns
    fn register_value(&self, thread_id: ThreadId, index: usize) -> Result<u64>
    {
        let context = self.thread_context(thread_id)?;
        self.registers()
            .value(&context, index)
            .ok_or_else(|| HostError::InvalidArgument(format!("register index {}", index)))
    }
}

/// Loaded modules of the target
///
/// Lookups re-enumerate every time; modules come and go between commands.
pub trait ModuleService: Send + Sync
{
    /// All modules, in a stable index order
    fn enumerate_modules(&self) -> Vec<ModuleInfo>;

    fn module_from_index(&self, index: usize) -> Option<ModuleInfo>
    {
        self.enumerate_modules().into_iter().find(|module| module.index == index)
    }

    fn module_from_base_address(&self, base: Address) -> Option<ModuleInfo>
    {
        self.enumerate_modules().into_iter().find(|module| module.image_base == base)
    }

    /// The module whose image contains `address`
    fn module_from_address(&self, address: Address) -> Option<ModuleInfo>
    {
        self.enumerate_modules().into_iter().find(|module| module.contains(address))
    }

    /// Modules whose file name (without directory) matches `name`, ignoring case
    fn modules_by_name(&self, name: &str) -> Vec<ModuleInfo>
    {
        self.enumerate_modules()
            .into_iter()
            .filter(|module| module.short_name().eq_ignore_ascii_case(name))
            .collect()
    }
}

/// The process or dump being inspected
pub trait Target: Send + Sync
{
    fn operating_system(&self) -> OperatingSystem;

    fn architecture(&self) -> Architecture;

    /// Process id, when the target is a live process
    fn process_id(&self) -> Option<ProcessId>;

    /// Directory the plugin may use for temporary files
    fn temp_directory(&self) -> PathBuf;

    /// Event fired when cached target state must be dropped
    fn flush_event(&self) -> &FlushEvent;

    /// Drop every cache subscribed to the flush event
    fn flush(&self)
    {
        self.flush_event().fire();
    }

    /// File name of the .NET Core runtime module on this target's OS
    fn runtime_module_name(&self) -> &'static str
    {
        runtime::runtime_module_name(self.operating_system())
    }
}

/// Per-session selection state
pub trait ContextService: Send + Sync
{
    /// Thread SOS commands operate on
    fn current_thread(&self) -> Option<ThreadId>;

    fn set_current_thread(&self, thread_id: Option<ThreadId>);

    /// Runtime SOS commands operate on
    fn current_runtime(&self) -> Option<Arc<dyn Runtime>>;
}

/// Sink for plugin output
pub trait ConsoleService: Send + Sync
{
    fn write(&self, text: &str);
}

/// Console writing to the host's standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl ConsoleService for StdoutConsole
{
    fn write(&self, text: &str)
    {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();
        // Output is best effort; a closed pipe must not fail the command.
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Native stack unwinding for the DAC and DBI
pub trait ThreadUnwindService: Send + Sync
{
    /// Unwind `context` one frame in place
    fn unwind(&self, thread_id: ThreadId, context: &mut [u8]) -> Result<()>;
}

/// Allocation inside the target, needed only for live editing scenarios
pub trait RemoteMemoryService: Send + Sync
{
    fn allocate(&self, address: Address, size: u32, type_flags: u32, protect: u32) -> Result<Address>;

    fn free(&self, address: Address, size: u32, type_flags: u32) -> Result<()>;
}

/// Every service one target offers, shared by all adapters of a session
#[derive(Clone)]
pub struct Services
{
    pub target: Arc<dyn Target>,
    pub memory: Arc<dyn MemoryService>,
    pub threads: Arc<dyn ThreadService>,
    pub modules: Arc<dyn ModuleService>,
    pub context: Arc<dyn ContextService>,
    pub symbols: Arc<dyn SymbolService>,
    pub console: Arc<dyn ConsoleService>,
    pub unwind: Option<Arc<dyn ThreadUnwindService>>,
    pub remote_memory: Option<Arc<dyn RemoteMemoryService>>,
    pub interrupt: InterruptToken,
}

impl Services
{
    /// Apply the target's sign-extension mask to a native address
    pub fn mask(&self, address: u64) -> Address
    {
        Address::new(address).masked(self.memory.sign_extension_mask())
    }

    /// Current thread, falling back to the first thread of the target
    pub fn current_thread(&self) -> Option<ThreadInfo>
    {
        match self.context.current_thread() {
            Some(thread_id) => self.threads.thread_from_id(thread_id),
            None => self.threads.enumerate_threads().into_iter().next(),
        }
    }
}

impl std::fmt::Debug for Services
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Services")
            .field("operating_system", &self.target.operating_system())
            .field("architecture", &self.target.architecture())
            .field("process_id", &self.target.process_id())
            .field("interrupted", &self.interrupt.is_requested())
            .finish_non_exhaustive()
    }
}
