//! Memory and register-context slots shared by several adapters.

use tracing::{error, trace};

use crate::com::marshal::{buffer, buffer_mut, write_out};
use crate::com::HResult;
use crate::services::Services;
use crate::types::ThreadId;

/// Read target memory into a caller buffer
///
/// The address is masked first. A zero-length request succeeds without a
/// service call.
///
/// # Safety
///
/// `dest` must be null or valid for `size` bytes of writes; `bytes_read`
/// must be null or valid for a `u32` write.
pub(crate) unsafe fn read_virtual(services: &Services, address: u64, dest: *mut u8, size: u32, bytes_read: *mut u32) -> HResult
{
    let address = services.mask(address);
    if size == 0 {
        write_out(bytes_read, 0);
        return HResult::S_OK;
    }
    let Some(dest) = buffer_mut(dest, size as usize) else {
        write_out(bytes_read, 0);
        return HResult::E_INVALIDARG;
    };
    match services.memory.read_memory(address, dest) {
        Ok(read) => {
            write_out(bytes_read, u32::try_from(read).unwrap_or(size));
            HResult::S_OK
        }
        Err(err) => {
            trace!(%address, size, error = %err, "ReadVirtual failed");
            write_out(bytes_read, 0);
            HResult::E_FAIL
        }
    }
}

/// Write a caller buffer into target memory
///
/// # Safety
///
/// `source` must be null or valid for `size` bytes of reads;
/// `bytes_written` must be null or valid for a `u32` write.
pub(crate) unsafe fn write_virtual(
    services: &Services,
    address: u64,
    source: *const u8,
    size: u32,
    bytes_written: *mut u32,
) -> HResult
{
    let address = services.mask(address);
    if size == 0 {
        write_out(bytes_written, 0);
        return HResult::S_OK;
    }
    let Some(source) = buffer(source, size as usize) else {
        write_out(bytes_written, 0);
        return HResult::E_INVALIDARG;
    };
    match services.memory.write_memory(address, source) {
        Ok(written) => {
            write_out(bytes_written, u32::try_from(written).unwrap_or(size));
            HResult::S_OK
        }
        Err(err) => {
            trace!(%address, size, error = %err, "WriteVirtual failed");
            write_out(bytes_written, 0);
            HResult::E_FAIL
        }
    }
}

/// Copy `size` bytes of a thread's native context into a caller buffer
///
/// The buffer must hold at least the target architecture's `ContextFlags`
/// field and at most the full context; nothing is written otherwise.
///
/// # Safety
///
/// `dest` must be null or valid for `size` bytes of writes.
pub(crate) unsafe fn thread_context(services: &Services, thread_id: u32, size: usize, dest: *mut u8) -> HResult
{
    let context = match services.threads.thread_context(ThreadId(thread_id)) {
        Ok(context) => context,
        Err(err) => {
            error!(thread = %ThreadId(thread_id), error = %err, "GetThreadContext failed");
            return HResult::E_FAIL;
        }
    };
    let minimum = services.target.architecture().minimum_context_size();
    if size < minimum || size > context.len() {
        error!(requested = size, available = context.len(), minimum, "GetThreadContext: invalid context size");
        return HResult::E_INVALIDARG;
    }
    let Some(dest) = buffer_mut(dest, size) else {
        return HResult::E_INVALIDARG;
    };
    dest.copy_from_slice(&context[..size]);
    HResult::S_OK
}

/// Unwind one frame through the optional unwind service
///
/// # Safety
///
/// `context` must be null or valid for `size` bytes of reads and writes.
pub(crate) unsafe fn virtual_unwind(services: &Services, thread_id: u32, size: u32, context: *mut u8) -> HResult
{
    let Some(unwind) = services.unwind.as_ref() else {
        return HResult::E_NOTIMPL;
    };
    let Some(context) = buffer_mut(context, size as usize) else {
        return HResult::E_INVALIDARG;
    };
    match unwind.unwind(ThreadId(thread_id), context) {
        Ok(()) => HResult::S_OK,
        Err(err) => {
            trace!(thread = %ThreadId(thread_id), error = %err, "VirtualUnwind failed");
            HResult::E_INVALIDARG
        }
    }
}
