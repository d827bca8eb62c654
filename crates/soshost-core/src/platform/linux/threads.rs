//! `ptrace`-based thread suspension.
//!
//! Each thread is attached individually with `PTRACE_ATTACH` (which stops
//! it) and released with `PTRACE_DETACH`. Detaching also lets the thread
//! run again, so resume and detach are the same operation here.

use std::io;

use tracing::trace;

use super::process::task_ids;
use crate::error::{HostError, Result};
use crate::platform::suspend::ThreadControl;
use crate::types::ThreadId;

/// [`ThreadControl`] over `ptrace(2)`
#[derive(Debug, Clone, Copy)]
pub struct LinuxThreadControl
{
    pid: u32,
}

impl LinuxThreadControl
{
    pub fn new(pid: u32) -> Self
    {
        Self { pid }
    }
}

fn ptrace_error(call: &str, thread_id: ThreadId) -> HostError
{
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => HostError::ThreadNotFound(thread_id.raw()),
        Some(libc::EPERM) => HostError::PermissionDenied(format!("{}({}) failed: {}", call, thread_id, err)),
        _ => HostError::SuspendFailed(format!("{}({}) failed: {}", call, thread_id, err)),
    }
}

/// `ptrace` request that takes no address or data argument
fn ptrace_plain(request: libc::c_uint, tid: libc::pid_t) -> libc::c_long
{
    // SAFETY: ATTACH and DETACH ignore the address; a null data pointer means no signal.
    unsafe { libc::ptrace(request, tid, std::ptr::null_mut::<libc::c_void>(), std::ptr::null_mut::<libc::c_void>()) }
}

impl ThreadControl for LinuxThreadControl
{
    fn thread_ids(&self) -> Result<Vec<ThreadId>>
    {
        task_ids(self.pid)
    }

    fn suspend(&self, thread_id: ThreadId) -> Result<()>
    {
        let tid = thread_id.raw() as libc::pid_t;
        if ptrace_plain(libc::PTRACE_ATTACH, tid) == -1 {
            return Err(ptrace_error("PTRACE_ATTACH", thread_id));
        }
        let mut status = 0;
        // SAFETY: `status` is a valid out pointer.
        if unsafe { libc::waitpid(tid, &mut status, libc::__WALL) } == -1 {
            let err = ptrace_error("waitpid", thread_id);
            ptrace_plain(libc::PTRACE_DETACH, tid);
            return Err(err);
        }
        trace!(thread = %thread_id, status, "thread stopped");
        Ok(())
    }

    fn resume(&self, thread_id: ThreadId) -> Result<()>
    {
        let tid = thread_id.raw() as libc::pid_t;
        if ptrace_plain(libc::PTRACE_DETACH, tid) == -1 {
            return Err(ptrace_error("PTRACE_DETACH", thread_id));
        }
        Ok(())
    }
}
