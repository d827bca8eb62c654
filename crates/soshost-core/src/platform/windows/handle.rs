//! Owned Win32 handles.

use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// A kernel handle closed on drop
#[derive(Debug)]
pub struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide and usable from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle
{
    /// Take ownership of `handle`; `None` for null or `INVALID_HANDLE_VALUE`
    pub fn new(handle: HANDLE) -> Option<Self>
    {
        (!handle.is_invalid() && !handle.0.is_null()).then_some(Self(handle))
    }

    pub fn raw(&self) -> HANDLE
    {
        self.0
    }
}

impl Drop for OwnedHandle
{
    fn drop(&mut self)
    {
        // SAFETY: the handle is owned and closed exactly once.
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            tracing::trace!(error = %err, "CloseHandle failed");
        }
    }
}
