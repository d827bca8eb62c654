//! # Windows Threads
//!
//! Thread enumeration through a ToolHelp snapshot, per-thread
//! suspend/resume for [`ThreadSuspender`](crate::platform::ThreadSuspender)
//! and `GetThreadContext`.
//!
//! ## Win32 APIs Used
//!
//! - **CreateToolhelp32Snapshot / Thread32First / Thread32Next**: list threads
//! - **OpenThread**: one handle per operation
//! - **SuspendThread / ResumeThread**: counted suspension
//! - **GetThreadContext**: full register context

use std::mem;

use windows::Win32::System::Diagnostics::Debug::{GetThreadContext, CONTEXT, CONTEXT_FLAGS};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows::Win32::System::Threading::{
    OpenThread, ResumeThread, SuspendThread, THREAD_ACCESS_RIGHTS, THREAD_GET_CONTEXT, THREAD_QUERY_INFORMATION,
    THREAD_SUSPEND_RESUME,
};

use super::handle::OwnedHandle;
use crate::error::{HostError, Result};
use crate::platform::suspend::ThreadControl;
use crate::types::ThreadId;

/// `CONTEXT_ALL` for the host architecture; also used for snapshot captures
#[cfg(target_arch = "x86_64")]
pub(crate) const CONTEXT_ALL: u32 = 0x0010_001F;
#[cfg(target_arch = "x86")]
pub(crate) const CONTEXT_ALL: u32 = 0x0001_003F;
#[cfg(target_arch = "aarch64")]
pub(crate) const CONTEXT_ALL: u32 = 0x0040_000F;

/// Suspend failure marker returned by `SuspendThread`/`ResumeThread`
const SUSPEND_FAILED: u32 = u32::MAX;

/// OS ids of every thread owned by `pid`
///
/// ## Errors
///
/// - `AttachFailed`: the ToolHelp snapshot could not be taken
pub fn enumerate_threads(pid: u32) -> Result<Vec<ThreadId>>
{
    // SAFETY: plain snapshot creation; the handle is owned below.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) }
        .map_err(|err| HostError::AttachFailed(format!("CreateToolhelp32Snapshot failed: {}", err)))?;
    let snapshot = OwnedHandle::new(snapshot)
        .ok_or_else(|| HostError::AttachFailed("CreateToolhelp32Snapshot returned an invalid handle".to_string()))?;

    let mut entry = THREADENTRY32 {
        dwSize: mem::size_of::<THREADENTRY32>() as u32,
        ..Default::default()
    };
    let mut threads = Vec::new();
    // SAFETY: `entry` is a properly sized THREADENTRY32.
    let mut more = unsafe { Thread32First(snapshot.raw(), &mut entry) }.is_ok();
    while more {
        if entry.th32OwnerProcessID == pid {
            threads.push(ThreadId(entry.th32ThreadID));
        }
        // SAFETY: as above.
        more = unsafe { Thread32Next(snapshot.raw(), &mut entry) }.is_ok();
    }
    Ok(threads)
}

fn open_thread(thread_id: ThreadId, access: THREAD_ACCESS_RIGHTS) -> Result<OwnedHandle>
{
    // SAFETY: the returned handle is owned immediately.
    let handle = unsafe { OpenThread(access, false, thread_id.raw()) }.map_err(|_| HostError::ThreadNotFound(thread_id.raw()))?;
    OwnedHandle::new(handle).ok_or(HostError::ThreadNotFound(thread_id.raw()))
}

/// Full native context of one thread
///
/// ## Errors
///
/// - `ThreadNotFound`: the thread cannot be opened
/// - `AttachFailed`: `GetThreadContext` failed
pub fn thread_context(thread_id: ThreadId) -> Result<Vec<u8>>
{
    let thread = open_thread(thread_id, THREAD_GET_CONTEXT | THREAD_QUERY_INFORMATION)?;
    let mut context = CONTEXT {
        ContextFlags: CONTEXT_FLAGS(CONTEXT_ALL),
        ..Default::default()
    };
    // SAFETY: `context` is the host's aligned CONTEXT with its flags set.
    unsafe { GetThreadContext(thread.raw(), &mut context) }
        .map_err(|err| HostError::AttachFailed(format!("GetThreadContext({}) failed: {}", thread_id, err)))?;

    // SAFETY: CONTEXT is plain data; the slice covers exactly the struct.
    let bytes = unsafe {
        std::slice::from_raw_parts((&context as *const CONTEXT).cast::<u8>(), mem::size_of::<CONTEXT>())
    };
    Ok(bytes.to_vec())
}

/// [`ThreadControl`] over `SuspendThread`/`ResumeThread`
#[derive(Debug, Clone, Copy)]
pub struct WindowsThreadControl
{
    pid: u32,
}

impl WindowsThreadControl
{
    pub fn new(pid: u32) -> Self
    {
        Self { pid }
    }
}

impl ThreadControl for WindowsThreadControl
{
    fn thread_ids(&self) -> Result<Vec<ThreadId>>
    {
        enumerate_threads(self.pid)
    }

    fn suspend(&self, thread_id: ThreadId) -> Result<()>
    {
        let thread = open_thread(thread_id, THREAD_SUSPEND_RESUME)?;
        // SAFETY: valid thread handle with suspend access.
        if unsafe { SuspendThread(thread.raw()) } == SUSPEND_FAILED {
            return Err(HostError::SuspendFailed(format!(
                "SuspendThread({}) failed: {}",
                thread_id,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn resume(&self, thread_id: ThreadId) -> Result<()>
    {
        let thread = open_thread(thread_id, THREAD_SUSPEND_RESUME)?;
        // SAFETY: valid thread handle with resume access.
        if unsafe { ResumeThread(thread.raw()) } == SUSPEND_FAILED {
            return Err(HostError::SuspendFailed(format!(
                "ResumeThread({}) failed: {}",
                thread_id,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}
