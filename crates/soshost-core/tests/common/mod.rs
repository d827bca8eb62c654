//! In-memory target shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use soshost_core::com::{ComRef, HResult, InterfaceDescriptor, IUNKNOWN_SLOTS};
use soshost_core::services::{
    ConsoleService, FlushEvent, HostContext, InterruptToken, LocalSymbolStore, MemoryService, ModuleService,
    RegisterSet, Services, Target, ThreadService,
};
use soshost_core::types::{Address, Architecture, ModuleInfo, OperatingSystem, ProcessId, ThreadId, ThreadInfo};
use soshost_core::{HostError, Result};

/// One contiguous block of readable memory plus fixed threads and modules
pub struct MockTarget
{
    pub os: OperatingSystem,
    pub architecture: Architecture,
    pub base: u64,
    pub memory: Mutex<Vec<u8>>,
    pub threads: Vec<ThreadInfo>,
    pub contexts: HashMap<ThreadId, Vec<u8>>,
    pub modules: Vec<ModuleInfo>,
    pub flush_event: FlushEvent,
    pub reads: AtomicUsize,
}

impl MockTarget
{
    pub fn new(os: OperatingSystem, architecture: Architecture) -> Self
    {
        Self {
            os,
            architecture,
            base: 0x1000,
            memory: Mutex::new((0..=255u8).cycle().take(0x1000).collect()),
            threads: Vec::new(),
            contexts: HashMap::new(),
            modules: Vec::new(),
            flush_event: FlushEvent::default(),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn with_thread(mut self, thread_id: u32, context: Vec<u8>) -> Self
    {
        let index = self.threads.len();
        self.threads.push(ThreadInfo {
            index,
            thread_id: ThreadId(thread_id),
            teb: None,
        });
        self.contexts.insert(ThreadId(thread_id), context);
        self
    }

    pub fn with_module(mut self, base: u64, size: u64, path: &str) -> Self
    {
        let module = ModuleInfo::new(self.modules.len(), Address::new(base), size, path);
        self.modules.push(module);
        self
    }

    pub fn read_count(&self) -> usize
    {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Target for MockTarget
{
    fn operating_system(&self) -> OperatingSystem
    {
        self.os
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        Some(ProcessId(4242))
    }

    fn temp_directory(&self) -> PathBuf
    {
        PathBuf::from("/tmp/soshost-tests/")
    }

    fn flush_event(&self) -> &FlushEvent
    {
        &self.flush_event
    }
}

impl MemoryService for MockTarget
{
    fn pointer_size(&self) -> usize
    {
        self.architecture.pointer_size()
    }

    fn read_memory(&self, address: Address, buffer: &mut [u8]) -> Result<usize>
    {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let memory = self.memory.lock().unwrap();
        let offset = address
            .value()
            .checked_sub(self.base)
            .filter(|offset| (*offset as usize) < memory.len())
            .ok_or(HostError::ReadFailed {
                address,
                size: buffer.len(),
            })? as usize;
        let count = buffer.len().min(memory.len() - offset);
        buffer[..count].copy_from_slice(&memory[offset..offset + count]);
        Ok(count)
    }

    fn write_memory(&self, address: Address, data: &[u8]) -> Result<usize>
    {
        let mut memory = self.memory.lock().unwrap();
        let offset = address.value().checked_sub(self.base).ok_or(HostError::WriteFailed {
            address,
            size: data.len(),
        })? as usize;
        if offset + data.len() > memory.len() {
            return Err(HostError::WriteFailed {
                address,
                size: data.len(),
            });
        }
        memory[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

impl ThreadService for MockTarget
{
    fn enumerate_threads(&self) -> Vec<ThreadInfo>
    {
        self.threads.clone()
    }

    fn thread_context(&self, thread_id: ThreadId) -> Result<Vec<u8>>
    {
        self.contexts.get(&thread_id).cloned().ok_or(HostError::ThreadNotFound(thread_id.raw()))
    }

    fn registers(&self) -> &'static RegisterSet
    {
        RegisterSet::for_architecture(self.architecture)
    }
}

impl ModuleService for MockTarget
{
    fn enumerate_modules(&self) -> Vec<ModuleInfo>
    {
        self.modules.clone()
    }
}

/// Console collecting everything written to it
#[derive(Default)]
pub struct RecordingConsole(pub Mutex<String>);

impl ConsoleService for RecordingConsole
{
    fn write(&self, text: &str)
    {
        self.0.lock().unwrap().push_str(text);
    }
}

/// Services over `target`, with a recording console
pub fn services(target: Arc<MockTarget>) -> (Services, Arc<RecordingConsole>)
{
    let console = Arc::new(RecordingConsole::default());
    let context = Arc::new(HostContext::new(target.clone(), target.os));
    let services = Services {
        target: target.clone(),
        memory: target.clone(),
        threads: target.clone(),
        modules: target,
        context,
        symbols: Arc::new(LocalSymbolStore::with_default_cache("/tmp/soshost-tests/SymbolCache")),
        console: console.clone(),
        unwind: None,
        remote_memory: None,
        interrupt: InterruptToken::new(),
    };
    (services, console)
}

/// A 64-bit Linux target with one thread and the runtime loaded
pub fn linux_target() -> MockTarget
{
    let registers = RegisterSet::for_architecture(Architecture::X86_64);
    let mut context = vec![0u8; registers.context_size()];
    let rip = registers.instruction_pointer_index().unwrap();
    let offset = registers.register(rip).unwrap().offset;
    context[offset..offset + 8].copy_from_slice(&0x7f00_dead_beefu64.to_le_bytes());

    MockTarget::new(OperatingSystem::Linux, Architecture::X86_64)
        .with_thread(0x51, context)
        .with_module(0x40_0000, 0x1_0000, "/app/app")
        .with_module(0x7f00_0000_0000, 0x60_0000, "/usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0/libcoreclr.so")
}

/// Vtable index of `method` on `descriptor`, `IUnknown` slots included
pub fn slot_index(descriptor: &InterfaceDescriptor, method: &str) -> usize
{
    IUNKNOWN_SLOTS + descriptor.slot_index(method).unwrap()
}

/// Borrowed view of an interface pointer for calling slots
pub fn interface(ptr: *mut std::ffi::c_void) -> ComRef
{
    // SAFETY: tests only pass pointers of live objects they own.
    unsafe { ComRef::from_borrowed(ptr) }.unwrap()
}

pub fn assert_hr(actual: HResult, expected: HResult)
{
    assert_eq!(actual, expected, "expected {expected}, got {actual}");
}
