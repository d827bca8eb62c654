//! Conversions between native argument shapes and Rust values.
//!
//! Every helper treats a null pointer as "caller not interested" (for
//! outputs) or "absent" (for inputs) instead of dereferencing it.

use std::ffi::{c_char, CStr};

use super::HResult;

/// Write `value` through an optional out-pointer
///
/// Returns `false` when `ptr` is null.
///
/// # Safety
///
/// `ptr` must be null or valid for a write of `T`.
pub unsafe fn write_out<T>(ptr: *mut T, value: T) -> bool
{
    if ptr.is_null() {
        return false;
    }
    ptr.write_unaligned(value);
    true
}

/// Read a NUL-terminated narrow string
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn read_cstr(ptr: *const c_char) -> Option<String>
{
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Read a NUL-terminated UTF-16 string
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated UTF-16 string.
pub unsafe fn read_wstr(ptr: *const u16) -> Option<String>
{
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    Some(String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len)))
}

/// View a caller buffer as a mutable slice
///
/// # Safety
///
/// `ptr` must be null or valid for `len` bytes of writes.
pub unsafe fn buffer_mut<'a>(ptr: *mut u8, len: usize) -> Option<&'a mut [u8]>
{
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts_mut(ptr, len))
}

/// View a caller buffer as a slice
///
/// # Safety
///
/// `ptr` must be null or valid for `len` bytes of reads.
pub unsafe fn buffer<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]>
{
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

/// Copy as much of `source` as fits, returning the number of bytes copied
pub fn copy_truncated(dest: &mut [u8], source: &[u8]) -> usize
{
    let count = dest.len().min(source.len());
    dest[..count].copy_from_slice(&source[..count]);
    count
}

/// Copy `value` into a narrow string buffer with dbgeng conventions
///
/// The needed size (including the terminator) is always reported. The
/// string is truncated and terminated when the buffer is too small, in
/// which case `S_FALSE` is returned.
///
/// # Safety
///
/// `buffer` must be null or valid for `buffer_size` bytes; `needed` must be
/// null or valid for a `u32` write.
pub unsafe fn write_cstr_buffer(buffer: *mut c_char, buffer_size: u32, needed: *mut u32, value: &str) -> HResult
{
    let bytes = value.as_bytes();
    write_out(needed, u32::try_from(bytes.len() + 1).unwrap_or(u32::MAX));
    let Some(dest) = buffer_mut(buffer.cast::<u8>(), buffer_size as usize) else {
        return HResult::S_OK;
    };
    if dest.is_empty() {
        return HResult::S_FALSE;
    }
    let last = dest.len() - 1;
    let copied = copy_truncated(&mut dest[..last], bytes);
    dest[copied] = 0;
    if copied < bytes.len() { HResult::S_FALSE } else { HResult::S_OK }
}

/// Encode `value` as NUL-terminated UTF-16
pub fn to_wide(value: &str) -> Vec<u16>
{
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Allocate a `BSTR` the plugin releases with `SysFreeString`
///
/// On Windows this is a real `BSTR`. Elsewhere the PAL's `SysFreeString`
/// frees the block starting four bytes before the string with `free`, so
/// the same length-prefixed layout is built with `malloc`.
pub fn alloc_bstr(value: &str) -> *mut u16
{
    #[cfg(windows)]
    {
        windows::core::BSTR::from(value).into_raw().cast_mut()
    }

    #[cfg(not(windows))]
    {
        let wide: Vec<u16> = value.encode_utf16().collect();
        let byte_len = wide.len() * 2;
        let Ok(prefix) = u32::try_from(byte_len) else {
            return std::ptr::null_mut();
        };
        // SAFETY: the block holds the length prefix, the string and its terminator.
        unsafe {
            let block = libc::malloc(4 + byte_len + 2).cast::<u8>();
            if block.is_null() {
                return std::ptr::null_mut();
            }
            block.cast::<u32>().write_unaligned(prefix);
            let text = block.add(4).cast::<u16>();
            std::ptr::copy_nonoverlapping(wide.as_ptr(), text, wide.len());
            text.add(wide.len()).write_unaligned(0);
            text
        }
    }
}

/// Free a string produced by [`alloc_bstr`]
///
/// # Safety
///
/// `bstr` must be null or come from [`alloc_bstr`] and not be freed yet.
pub unsafe fn free_bstr(bstr: *mut u16)
{
    if bstr.is_null() {
        return;
    }

    #[cfg(windows)]
    {
        drop(windows::core::BSTR::from_raw(bstr.cast_const()));
    }

    #[cfg(not(windows))]
    {
        libc::free(bstr.cast::<u8>().sub(4).cast::<libc::c_void>());
    }
}

#[cfg(test)]
mod tests
{
    use std::ptr;

    use super::*;

    #[test]
    fn test_write_out_null_is_skipped()
    {
        let mut value = 0u32;
        assert!(unsafe { write_out(&mut value, 7) });
        assert_eq!(value, 7);
        assert!(!unsafe { write_out(ptr::null_mut::<u32>(), 7) });
    }

    #[test]
    fn test_write_cstr_buffer_truncates_and_reports_size()
    {
        let mut buffer = [0x55u8; 4];
        let mut needed = 0u32;
        let hr = unsafe { write_cstr_buffer(buffer.as_mut_ptr().cast(), 4, &mut needed, "coreclr") };
        assert_eq!(hr, HResult::S_FALSE);
        assert_eq!(needed, 8);
        assert_eq!(&buffer, b"cor\0");

        let mut buffer = [0u8; 16];
        let hr = unsafe { write_cstr_buffer(buffer.as_mut_ptr().cast(), 16, ptr::null_mut(), "sos") };
        assert_eq!(hr, HResult::S_OK);
        assert_eq!(&buffer[..4], b"sos\0");
    }

    #[test]
    fn test_wide_strings()
    {
        let wide = to_wide("libcoreclr.so");
        assert_eq!(unsafe { read_wstr(wide.as_ptr()) }.as_deref(), Some("libcoreclr.so"));
        assert_eq!(unsafe { read_wstr(ptr::null()) }, None);
    }

    #[test]
    fn test_bstr_roundtrip()
    {
        let bstr = alloc_bstr("Program.cs");
        assert!(!bstr.is_null());
        assert_eq!(unsafe { read_wstr(bstr) }.as_deref(), Some("Program.cs"));
        unsafe { free_bstr(bstr) };
    }
}
