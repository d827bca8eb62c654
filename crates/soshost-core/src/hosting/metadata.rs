//! Metadata locator callbacks shared by the data targets and the symbol
//! service wrapper.
//!
//! Both report the needed size through their size out-pointer even when
//! they fail, so callers can retry with a larger buffer.

use tracing::{debug, error};

use crate::com::marshal::{buffer_mut, copy_truncated, write_out};
use crate::com::HResult;
use crate::services::symbols::keys::pe_identity_key;
use crate::services::SymbolService;

/// `ICLRMetadataLocator::GetMetadata`
///
/// Copies at most `buffer.len()` bytes of the image's metadata and reports
/// the full metadata size in `data_size`.
///
/// # Safety
///
/// `buffer` must be null or valid for `buffer_size` bytes; `data_size` must
/// be null or valid for a `u32` write.
pub(crate) unsafe fn locate_metadata(
    symbols: &dyn SymbolService,
    image_path: Option<String>,
    timestamp: u32,
    size_of_image: u32,
    buffer_size: u32,
    buffer: *mut u8,
    data_size: *mut u32,
) -> HResult
{
    let Some(dest) = buffer_mut(buffer, buffer_size as usize) else {
        return HResult::E_INVALIDARG;
    };
    let image_path = image_path.unwrap_or_default();

    let (hr, size) = match symbols.get_metadata(&image_path, timestamp, size_of_image) {
        Some(metadata) if !metadata.is_empty() => {
            copy_truncated(dest, &metadata);
            (HResult::S_OK, metadata.len())
        }
        _ => {
            debug!(image = %image_path, timestamp = format_args!("{:08X}", timestamp), "metadata not found");
            (HResult::E_FAIL, 0)
        }
    };
    write_out(data_size, u32::try_from(size).unwrap_or(u32::MAX));
    hr
}

/// `ICorDebugMetaDataLocator::GetMetaData`
///
/// Downloads the image from the symbol store and returns its local path as
/// NUL-terminated UTF-16. The needed length in characters (terminator
/// included) is written to `needed`, 0 when nothing was found.
///
/// # Safety
///
/// `path_buffer` must be null or valid for `path_buffer_size` UTF-16 units;
/// `needed` must be null or valid for a `u32` write.
pub(crate) unsafe fn locate_metadata_file(
    symbols: &dyn SymbolService,
    image_path: Option<String>,
    timestamp: u32,
    size_of_image: u32,
    path_buffer_size: u32,
    needed: *mut u32,
    path_buffer: *mut u16,
) -> HResult
{
    let image_path = image_path.unwrap_or_default();
    let mut actual_size = 0usize;

    let hr = if !symbols.is_symbol_store_enabled() {
        error!(image = %image_path, timestamp = format_args!("{:08X}", timestamp), "symbol store not enabled");
        HResult::E_FAIL
    } else {
        let key = pe_identity_key(&image_path, timestamp, size_of_image);
        match symbols.download_file(&key) {
            Some(local) if !local.as_os_str().is_empty() => {
                let wide: Vec<u16> = local.to_string_lossy().encode_utf16().chain(std::iter::once(0)).collect();
                actual_size = wide.len();
                if (path_buffer_size as usize) > actual_size && !path_buffer.is_null() {
                    debug!(file = %local.display(), "metadata file located");
                    std::ptr::copy_nonoverlapping(wide.as_ptr(), path_buffer, wide.len());
                    HResult::S_OK
                } else {
                    error!(needed = actual_size, available = path_buffer_size, "metadata path buffer too small");
                    HResult::E_INSUFFICIENT_BUFFER
                }
            }
            _ => {
                error!(image = %image_path, timestamp = format_args!("{:08X}", timestamp), "metadata download failed");
                HResult::E_FAIL
            }
        }
    };
    write_out(needed, u32::try_from(actual_size).unwrap_or(u32::MAX));
    hr
}
