//! # Platform-Specific Process Access
//!
//! Each platform has its own submodule implementing [`ProcessReader`] and
//! [`ThreadControl`] with that platform's native APIs:
//!
//! - **Windows**: `OpenProcess`, `ReadProcessMemory`, ToolHelp thread
//!   lists, `SuspendThread` and PSS snapshots
//!   - See: [Process Snapshotting](https://learn.microsoft.com/en-us/windows/win32/api/_proc_snap/)
//! - **Linux**: `/proc`, `process_vm_readv` and `ptrace`
//!   - See: [process_vm_readv(2)](https://man7.org/linux/man-pages/man2/process_vm_readv.2.html)
//!
//! Everything above the reader ([`LiveTarget`], [`ThreadSuspender`]) is
//! platform independent.

pub mod live;
pub mod suspend;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(windows)]
pub mod windows;

pub use live::{LiveTarget, ProcessReader};
pub use suspend::{ThreadControl, ThreadSuspender};

use crate::error::Result;

/// How a live process is held while it is inspected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode
{
    /// Read the process while it keeps running
    #[default]
    Passive,
    /// Suspend every thread until the reader is dropped
    Suspend,
    /// Read a point-in-time clone (Windows PSS snapshots)
    Snapshot,
}

/// Open a live process for reading
///
/// ## Errors
///
/// - `ProcessNotFound`, `PermissionDenied`, `ArchitectureMismatch`, `AttachFailed`
/// - `NotSupported`: no reader exists for this host OS, or the mode is
///   unavailable on it (snapshots outside Windows)
#[cfg(windows)]
pub fn open_process(pid: u32, mode: AttachMode) -> Result<Box<dyn ProcessReader>>
{
    Ok(Box::new(windows::WindowsProcessReader::open(pid, mode)?))
}

#[cfg(target_os = "linux")]
pub fn open_process(pid: u32, mode: AttachMode) -> Result<Box<dyn ProcessReader>>
{
    use crate::error::HostError;

    let reader = linux::LinuxProcessReader::open(pid)?;
    match mode {
        AttachMode::Passive => Ok(Box::new(reader)),
        AttachMode::Suspend => {
            let suspender = ThreadSuspender::new(linux::LinuxThreadControl::new(pid))?;
            Ok(Box::new(SuspendedReader { reader, suspender }))
        }
        AttachMode::Snapshot => Err(HostError::NotSupported("process snapshots on Linux".to_string())),
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
pub fn open_process(pid: u32, mode: AttachMode) -> Result<Box<dyn ProcessReader>>
{
    let _ = (pid, mode);
    Err(crate::error::HostError::NotSupported(format!(
        "attaching to live processes on {}",
        std::env::consts::OS
    )))
}

/// A reader whose process stays suspended for as long as the reader lives
#[cfg(target_os = "linux")]
struct SuspendedReader<R: ProcessReader, C: ThreadControl>
{
    reader: R,
    suspender: ThreadSuspender<C>,
}

#[cfg(target_os = "linux")]
impl<R: ProcessReader, C: ThreadControl> ProcessReader for SuspendedReader<R, C>
{
    fn process_id(&self) -> crate::types::ProcessId
    {
        self.reader.process_id()
    }

    fn operating_system(&self) -> crate::types::OperatingSystem
    {
        self.reader.operating_system()
    }

    fn architecture(&self) -> crate::types::Architecture
    {
        self.reader.architecture()
    }

    fn read(&self, address: crate::types::Address, buffer: &mut [u8]) -> Result<usize>
    {
        self.reader.read(address, buffer)
    }

    fn write(&self, address: crate::types::Address, data: &[u8]) -> Result<usize>
    {
        self.reader.write(address, data)
    }

    fn thread_ids(&self) -> Result<Vec<crate::types::ThreadId>>
    {
        self.reader.thread_ids()
    }

    /// Registers of a thread this reader stopped come from `ptrace`
    fn thread_context(&self, thread_id: crate::types::ThreadId) -> Result<Vec<u8>>
    {
        if self.suspender.suspended().contains(&thread_id) {
            return linux::context::read_thread_context(self.reader.architecture(), thread_id);
        }
        self.reader.thread_context(thread_id)
    }

    fn modules(&self) -> Result<Vec<crate::types::ModuleInfo>>
    {
        self.reader.modules()
    }
}
