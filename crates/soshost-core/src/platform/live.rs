//! Services over a live process.
//!
//! A [`ProcessReader`] is the thin OS layer (read memory, list threads and
//! modules, fetch a thread context). [`LiveTarget`] turns one into the
//! target, memory, thread and module services the adapters consume.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::services::symbols::read_image_identity;
use crate::services::{
    FlushEvent, HostContext, ImageFormat, ImageIdentity, InterruptToken, LocalSymbolStore, MemoryService, ModuleService,
    RegisterSet, Services, StdoutConsole, Target, ThreadService,
};
use crate::types::{Address, Architecture, ModuleInfo, OperatingSystem, ProcessId, ThreadId, ThreadInfo};

/// OS access to one live process
pub trait ProcessReader: Send + Sync
{
    fn process_id(&self) -> ProcessId;

    fn operating_system(&self) -> OperatingSystem;

    fn architecture(&self) -> Architecture;

    /// Read up to `buffer.len()` bytes; returns how many were read
    ///
    /// ## Errors
    ///
    /// - `ReadFailed`: nothing could be read at `address`
    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<usize>;

    /// ## Errors
    ///
    /// - `WriteFailed`: nothing could be written at `address`
    /// - `NotSupported`: the reader is read-only
    fn write(&self, address: Address, data: &[u8]) -> Result<usize>
    {
        let _ = (address, data);
        Err(HostError::NotSupported("writing target memory".to_string()))
    }

    /// OS ids of the live threads
    fn thread_ids(&self) -> Result<Vec<ThreadId>>;

    /// Native `CONTEXT` bytes of one thread
    ///
    /// ## Errors
    ///
    /// - `ThreadNotFound`: no such thread
    /// - `NotSupported`: the platform cannot provide contexts
    fn thread_context(&self, thread_id: ThreadId) -> Result<Vec<u8>>;

    /// Loaded modules; the index field is assigned by the caller
    fn modules(&self) -> Result<Vec<ModuleInfo>>;
}

/// Target, memory, thread and module services over a [`ProcessReader`]
pub struct LiveTarget
{
    reader: Box<dyn ProcessReader>,
    flush_event: FlushEvent,
    temp_directory: PathBuf,
    modules: Mutex<Option<Vec<ModuleInfo>>>,
}

impl LiveTarget
{
    pub fn new(reader: Box<dyn ProcessReader>, temp_directory: impl Into<PathBuf>) -> Self
    {
        Self {
            reader,
            flush_event: FlushEvent::default(),
            temp_directory: temp_directory.into(),
            modules: Mutex::new(None),
        }
    }

    pub fn reader(&self) -> &dyn ProcessReader
    {
        self.reader.as_ref()
    }

    /// Service set for a session on this target
    ///
    /// The context service forgets its runtime whenever the target flushes.
    pub fn into_services(self, config: &HostConfig) -> Services
    {
        let os = self.reader.operating_system();
        let target = Arc::new(self);
        let context = Arc::new(HostContext::new(target.clone(), os));
        // The context owns the target, so the subscription must not own the context.
        let flushed = Arc::downgrade(&context);
        let _ = target.flush_event.register(move || {
            if let Some(context) = flushed.upgrade() {
                context.flush();
            }
        });

        Services {
            target: target.clone(),
            memory: target.clone(),
            threads: target.clone(),
            modules: target,
            context,
            symbols: Arc::new(LocalSymbolStore::with_default_cache(symbol_cache(config.temp_directory()))),
            console: Arc::new(StdoutConsole),
            unwind: None,
            remote_memory: None,
            interrupt: InterruptToken::new(),
        }
    }

    fn load_modules(&self) -> Vec<ModuleInfo>
    {
        let mut modules = match self.reader.modules() {
            Ok(modules) => modules,
            Err(err) => {
                debug!(error = %err, "module enumeration failed");
                Vec::new()
            }
        };
        let pe = self.reader.operating_system() == OperatingSystem::Windows;
        for (index, module) in modules.iter_mut().enumerate() {
            module.index = index;
            if pe && (module.timestamp.is_none() || module.image_size == 0) {
                if let Some(ImageIdentity::Pe {
                    timestamp,
                    size_of_image,
                    ..
                }) = read_image_identity(self, ImageFormat::Pe, module.image_base)
                {
                    module.timestamp.get_or_insert(timestamp);
                    if module.image_size == 0 {
                        module.image_size = u64::from(size_of_image);
                    }
                }
            }
        }
        trace!(count = modules.len(), "modules enumerated");
        modules
    }
}

/// `<temp>/SymbolCache`
fn symbol_cache(temp_directory: &Path) -> PathBuf
{
    temp_directory.join("SymbolCache")
}

impl Target for LiveTarget
{
    fn operating_system(&self) -> OperatingSystem
    {
        self.reader.operating_system()
    }

    fn architecture(&self) -> Architecture
    {
        self.reader.architecture()
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        Some(self.reader.process_id())
    }

    fn temp_directory(&self) -> PathBuf
    {
        self.temp_directory.clone()
    }

    fn flush_event(&self) -> &FlushEvent
    {
        &self.flush_event
    }

    fn flush(&self)
    {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.flush_event.fire();
    }
}

impl MemoryService for LiveTarget
{
    fn pointer_size(&self) -> usize
    {
        self.reader.architecture().pointer_size()
    }

    fn read_memory(&self, address: Address, buffer: &mut [u8]) -> Result<usize>
    {
        self.reader.read(address, buffer)
    }

    fn write_memory(&self, address: Address, data: &[u8]) -> Result<usize>
    {
        self.reader.write(address, data)
    }
}

impl ThreadService for LiveTarget
{
    fn enumerate_threads(&self) -> Vec<ThreadInfo>
    {
        match self.reader.thread_ids() {
            Ok(ids) => ids
                .into_iter()
                .enumerate()
                .map(|(index, thread_id)| ThreadInfo {
                    index,
                    thread_id,
                    teb: None,
                })
                .collect(),
            Err(err) => {
                debug!(error = %err, "thread enumeration failed");
                Vec::new()
            }
        }
    }

    fn thread_context(&self, thread_id: ThreadId) -> Result<Vec<u8>>
    {
        self.reader.thread_context(thread_id)
    }

    fn registers(&self) -> &'static RegisterSet
    {
        RegisterSet::for_architecture(self.reader.architecture())
    }
}

impl ModuleService for LiveTarget
{
    fn enumerate_modules(&self) -> Vec<ModuleInfo>
    {
        let mut cached = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        cached.get_or_insert_with(|| self.load_modules()).clone()
    }
}

impl std::fmt::Debug for LiveTarget
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("LiveTarget")
            .field("process_id", &self.reader.process_id())
            .field("operating_system", &self.reader.operating_system())
            .field("architecture", &self.reader.architecture())
            .finish_non_exhaustive()
    }
}
