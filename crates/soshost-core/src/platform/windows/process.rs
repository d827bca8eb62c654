//! # Windows Process Reader
//!
//! Reads a live Windows process, optionally through a PSS (process
//! snapshot) clone and optionally with every thread suspended.
//!
//! ## Teardown order
//!
//! 1. resume the suspended threads
//! 2. free the snapshot (a failure is logged, never returned)
//! 3. close the process handle
//! 4. terminate the clone
//!
//! ## Win32 APIs Used
//!
//! - **OpenProcess**: `PROCESS_VM_READ | PROCESS_QUERY_INFORMATION`
//! - **IsWow64Process**: host/target bitness check
//! - **PssCaptureSnapshot / PssQuerySnapshot / PssFreeSnapshot**: VA clone
//! - **ReadProcessMemory**: memory reads
//! - **EnumProcessModulesEx / GetModuleFileNameExW**: module list

use std::ffi::c_void;
use std::mem;

use tracing::{debug, warn};
use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, HANDLE, HMODULE};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Diagnostics::ProcessSnapshotting::{
    PssCaptureSnapshot, PssFreeSnapshot, PssQuerySnapshot, HPSS, PSS_CAPTURE_VA_CLONE, PSS_QUERY_VA_CLONE_INFORMATION,
};
use windows::Win32::System::ProcessStatus::{EnumProcessModulesEx, GetModuleFileNameExW, LIST_MODULES_ALL};
use windows::Win32::System::Threading::{
    GetCurrentProcess, GetProcessId, IsWow64Process, OpenProcess, TerminateProcess, PROCESS_ACCESS_RIGHTS,
    PROCESS_ALL_ACCESS, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use super::handle::OwnedHandle;
use super::threads::{self, WindowsThreadControl, CONTEXT_ALL};
use crate::error::{HostError, Result};
use crate::platform::live::ProcessReader;
use crate::platform::suspend::ThreadSuspender;
use crate::platform::AttachMode;
use crate::types::{Address, Architecture, ModuleInfo, OperatingSystem, ProcessId, ThreadId};

const INITIAL_MODULES: usize = 256;
const MAX_MODULES: usize = 65536;
const INITIAL_PATH_CHARS: usize = 260;
/// Longest path the NT object manager accepts
const MAX_PATH_CHARS: usize = 32768;

/// A PSS VA clone of the target
struct ProcessSnapshot
{
    snapshot: HPSS,
    clone: OwnedHandle,
    clone_pid: u32,
}

// SAFETY: the snapshot handle is only used from `free`, under `&mut self`.
unsafe impl Send for ProcessSnapshot {}
unsafe impl Sync for ProcessSnapshot {}

impl ProcessSnapshot
{
    fn capture(pid: u32) -> Result<Self>
    {
        let source = open_process(pid, PROCESS_ALL_ACCESS)?;
        let mut snapshot = HPSS::default();
        // SAFETY: `source` is a live process handle; `snapshot` receives the result.
        let status = unsafe { PssCaptureSnapshot(source.raw(), PSS_CAPTURE_VA_CLONE, CONTEXT_ALL, &mut snapshot) };
        if status != Default::default() {
            return Err(HostError::AttachFailed(format!("Could not create snapshot to process. Error {:?}.", status)));
        }

        let mut clone = HANDLE::default();
        // SAFETY: the buffer is exactly one HANDLE, as this information class requires.
        let status = unsafe {
            PssQuerySnapshot(
                snapshot,
                PSS_QUERY_VA_CLONE_INFORMATION,
                (&mut clone as *mut HANDLE).cast::<c_void>(),
                mem::size_of::<HANDLE>() as u32,
            )
        };
        let clone = match OwnedHandle::new(clone) {
            Some(clone) if status == Default::default() => clone,
            _ => {
                free_snapshot(snapshot);
                return Err(HostError::AttachFailed(format!("Could not create snapshot to process. Error {:?}.", status)));
            }
        };
        // SAFETY: `clone` is a live process handle.
        let clone_pid = unsafe { GetProcessId(clone.raw()) };
        debug!(pid, clone_pid, "process snapshot captured");
        Ok(Self {
            snapshot,
            clone,
            clone_pid,
        })
    }
}

fn free_snapshot(snapshot: HPSS)
{
    // SAFETY: `snapshot` came from PssCaptureSnapshot on this process and is freed once.
    let status = unsafe { PssFreeSnapshot(GetCurrentProcess(), snapshot) };
    if status != Default::default() {
        warn!(status = ?status, "Unable to free the snapshot of the process we took");
    }
}

fn open_process(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> Result<OwnedHandle>
{
    // SAFETY: the handle is owned immediately.
    match unsafe { OpenProcess(access, false, pid) } {
        Ok(handle) => OwnedHandle::new(handle).ok_or(HostError::ProcessNotFound(pid)),
        Err(err) if err.code() == ERROR_INVALID_PARAMETER.to_hresult() => Err(HostError::ProcessNotFound(pid)),
        Err(err) if err.code() == ERROR_ACCESS_DENIED.to_hresult() => {
            Err(HostError::PermissionDenied(format!("Could not attach to process {}, error: {}", pid, err)))
        }
        Err(err) => Err(HostError::AttachFailed(format!("Could not attach to process {}, error: {:x}", pid, err.code().0))),
    }
}

fn is_wow64(process: HANDLE) -> Option<bool>
{
    let mut wow64 = Default::default();
    // SAFETY: `process` is live and `wow64` receives a BOOL.
    unsafe { IsWow64Process(process, &mut wow64) }.ok()?;
    Some(wow64.as_bool())
}

/// [`ProcessReader`] for a Windows process
pub struct WindowsProcessReader
{
    original_pid: u32,
    pid: u32,
    suspender: Option<ThreadSuspender<WindowsThreadControl>>,
    snapshot: Option<ProcessSnapshot>,
    process: Option<OwnedHandle>,
}

impl WindowsProcessReader
{
    /// Open `pid` for reading
    ///
    /// ## Errors
    ///
    /// - `ProcessNotFound`: the process is not running
    /// - `PermissionDenied`: access was refused, or no thread could be suspended
    /// - `ArchitectureMismatch`: host and target bitness differ
    /// - `AttachFailed`: snapshot creation or any other OS failure
    pub fn open(pid: u32, mode: AttachMode) -> Result<Self>
    {
        let mut reader = Self {
            original_pid: pid,
            pid,
            suspender: None,
            snapshot: None,
            process: None,
        };
        if mode == AttachMode::Snapshot {
            let snapshot = ProcessSnapshot::capture(pid)?;
            reader.pid = snapshot.clone_pid;
            reader.snapshot = Some(snapshot);
        }

        let process = open_process(reader.pid, PROCESS_VM_READ | PROCESS_QUERY_INFORMATION)?;
        // SAFETY: pseudo handle of the current process.
        let host = unsafe { GetCurrentProcess() };
        if let (Some(host_wow64), Some(target_wow64)) = (is_wow64(host), is_wow64(process.raw())) {
            if host_wow64 != target_wow64 {
                return Err(HostError::ArchitectureMismatch);
            }
        }
        reader.process = Some(process);

        if mode == AttachMode::Suspend {
            reader.suspender = Some(ThreadSuspender::new(WindowsThreadControl::new(reader.pid))?);
        }
        debug!(pid, reading = reader.pid, ?mode, "attached to process");
        Ok(reader)
    }

    fn handle(&self) -> Result<HANDLE>
    {
        self.process
            .as_ref()
            .map(OwnedHandle::raw)
            .ok_or_else(|| HostError::AttachFailed("process handle is closed".to_string()))
    }

    /// Pid of the process actually read (the clone in snapshot mode)
    pub fn reading_pid(&self) -> u32
    {
        self.pid
    }
}

impl Drop for WindowsProcessReader
{
    fn drop(&mut self)
    {
        drop(self.suspender.take());
        let snapshot = self.snapshot.take();
        if let Some(snapshot) = snapshot.as_ref() {
            free_snapshot(snapshot.snapshot);
        }
        drop(self.process.take());
        if let Some(snapshot) = snapshot {
            // SAFETY: the clone handle came back from PssQuerySnapshot with full access.
            if let Err(err) = unsafe { TerminateProcess(snapshot.clone.raw(), 0) } {
                warn!(clone_pid = snapshot.clone_pid, error = %err, "Unable to kill the cloned process");
            }
        }
    }
}

impl ProcessReader for WindowsProcessReader
{
    fn process_id(&self) -> ProcessId
    {
        ProcessId(self.original_pid)
    }

    fn operating_system(&self) -> OperatingSystem
    {
        OperatingSystem::Windows
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::current()
    }

    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<usize>
    {
        let process = self.handle()?;
        let mut read = 0usize;
        // SAFETY: `buffer` is valid for `buffer.len()` bytes of writes.
        let result = unsafe {
            ReadProcessMemory(
                process,
                address.value() as usize as *const c_void,
                buffer.as_mut_ptr().cast::<c_void>(),
                buffer.len(),
                Some(&mut read),
            )
        };
        // A partial copy fails the call but still reports the bytes read.
        if read > 0 || (result.is_ok() && buffer.is_empty()) {
            Ok(read)
        } else {
            Err(HostError::ReadFailed {
                address,
                size: buffer.len(),
            })
        }
    }

    fn thread_ids(&self) -> Result<Vec<ThreadId>>
    {
        threads::enumerate_threads(self.pid)
    }

    fn thread_context(&self, thread_id: ThreadId) -> Result<Vec<u8>>
    {
        threads::thread_context(thread_id)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>>
    {
        let process = self.handle()?;
        // The module list can grow between calls, so size from `needed` and retry.
        let handles = fill_growing(INITIAL_MODULES, MAX_MODULES, |handles: &mut [HMODULE]| {
            let mut needed = 0u32;
            // SAFETY: `handles` is writable and its byte size is passed.
            unsafe {
                EnumProcessModulesEx(
                    process,
                    handles.as_mut_ptr(),
                    mem::size_of_val(handles) as u32,
                    &mut needed,
                    LIST_MODULES_ALL,
                )
            }
            .map_err(|err| HostError::AttachFailed(format!("Unable to get process modules: {}", err)))?;
            Ok(needed as usize / mem::size_of::<HMODULE>())
        })?;

        let modules = handles
            .into_iter()
            .map(|module| {
                let path = fill_growing(INITIAL_PATH_CHARS, MAX_PATH_CHARS, |path: &mut [u16]| {
                    let capacity = path.len();
                    // SAFETY: `path` is a writable UTF-16 buffer.
                    let len = unsafe { GetModuleFileNameExW(Some(process), Some(module), path) } as usize;
                    // A full buffer means the name was cut off.
                    Ok(if len < capacity { len } else { capacity * 2 })
                })?;
                let file_name = String::from_utf16_lossy(&path);
                // Size and timestamp are read from the PE headers by the live target.
                Ok(ModuleInfo::new(0, Address::new(module.0 as usize as u64), 0, file_name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(modules)
    }
}

/// Call `fill` with a buffer until the element count it reports fits
///
/// `fill` returns how many elements it needs. A count larger than the
/// buffer grows it and retries, up to `limit` elements; past the limit the
/// full buffer is returned as is.
fn fill_growing<T: Clone + Default>(
    initial: usize,
    limit: usize,
    mut fill: impl FnMut(&mut [T]) -> Result<usize>,
) -> Result<Vec<T>>
{
    let mut buffer = vec![T::default(); initial.min(limit)];
    loop {
        let needed = fill(&mut buffer)?;
        if needed <= buffer.len() {
            buffer.truncate(needed);
            return Ok(buffer);
        }
        if buffer.len() >= limit {
            warn!(needed, limit, "buffer limit reached, result truncated");
            return Ok(buffer);
        }
        buffer.resize(needed.min(limit), T::default());
    }
}

impl std::fmt::Debug for WindowsProcessReader
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("WindowsProcessReader")
            .field("pid", &self.original_pid)
            .field("reading_pid", &self.pid)
            .field("snapshot", &self.snapshot.is_some())
            .field("suspended", &self.suspender.as_ref().map(|suspender| suspender.suspended().len()))
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_fill_growing_retries_until_the_list_fits()
    {
        let mut calls = Vec::new();
        let modules = fill_growing(4, 1024, |buffer: &mut [u32]| {
            calls.push(buffer.len());
            for (index, slot) in buffer.iter_mut().enumerate().take(300) {
                *slot = index as u32;
            }
            Ok(300)
        })
        .unwrap();
        assert_eq!(calls, vec![4, 300]);
        assert_eq!(modules.len(), 300);
        assert_eq!(modules[299], 299);
    }

    #[test]
    fn test_fill_growing_stops_at_the_limit()
    {
        let path = fill_growing(8, 32, |buffer: &mut [u16]| Ok(buffer.len() * 2)).unwrap();
        assert_eq!(path.len(), 32);
    }
}
