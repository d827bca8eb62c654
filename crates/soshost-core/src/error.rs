//! # Error Types
//!
//! General error handling for the host.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Errors only travel through ordinary Rust code: attach, module loading and
//! object construction. Once a call has arrived from native code through a
//! vtable slot, the adapter converts the error to an [`HResult`] with
//! `HResult::from(&err)` and nothing crosses back as a panic.

use thiserror::Error;

use crate::com::{ComError, HResult};
use crate::types::Address;

/// Main error type for host operations
///
/// ## Error Categories
///
/// 1. **Attach errors**: ProcessNotFound, PermissionDenied, AttachFailed, ArchitectureMismatch, SuspendFailed
/// 2. **Operational errors**: ReadFailed, WriteFailed, ThreadNotFound, ModuleNotFound, NotSupported
/// 3. **Protocol errors**: Com
/// 4. **Plugin errors**: LibraryLoad, EntryPointNotFound, CommandNotFound, InitializationFailed, CommandFailed, NotInitialized, HelpNotFound
/// 5. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum HostError
{
    /// The process with the given PID doesn't exist or has exited
    #[error("Process {0} is not running.")]
    ProcessNotFound(u32),

    /// Insufficient permissions to open or suspend the target
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid argument passed by a caller
    ///
    /// Maps to `E_INVALIDARG` at the native boundary.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failed to attach to a process for a reason not covered by a more
    /// specific variant
    #[error("Could not attach to process: {0}")]
    AttachFailed(String),

    /// The host and the target use different architectures
    #[error("Mismatched architecture between this process and the target process.")]
    ArchitectureMismatch,

    /// Suspending the target's threads failed for every thread
    #[error("Failed to suspend process: {0}")]
    SuspendFailed(String),

    /// Reading target memory failed
    #[error("Failed to read {size} bytes at {address}")]
    ReadFailed
    {
        /// First address of the read
        address: Address,
        /// Requested size
        size: usize,
    },

    /// Writing target memory failed
    #[error("Failed to write {size} bytes at {address}")]
    WriteFailed
    {
        /// First address of the write
        address: Address,
        /// Requested size
        size: usize,
    },

    /// No thread with the given OS id or index
    #[error("Thread not found: {0:#x}")]
    ThreadNotFound(u32),

    /// No module matched the lookup
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// The operation is intentionally unsupported by this host or service
    ///
    /// Maps to `E_NOTIMPL` at the native boundary.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A COM protocol error while building or querying an object
    #[error("COM error: {0}")]
    Com(#[from] ComError),

    /// Loading a native library failed
    ///
    /// The message is already actionable (it names the path and, on Linux,
    /// the missing system package).
    #[error("{message}")]
    LibraryLoad
    {
        /// Library that failed to load
        path: String,
        /// Full diagnostic
        message: String,
    },

    /// A required export is missing from a loaded library
    #[error("Can not find export: {0}")]
    EntryPointNotFound(String),

    /// The SOS module has no command with this name
    #[error("Unrecognized SOS command '{0}'")]
    CommandNotFound(String),

    /// The SOS initializer returned a failure code
    #[error("SOS initialization FAILED {0}")]
    InitializationFailed(HResult),

    /// An SOS command returned a failure code
    #[error("SOS command '{command}' FAILED {hresult}")]
    CommandFailed
    {
        /// Command name
        command: String,
        /// Code returned by the export
        hresult: HResult,
    },

    /// The SOS module has not been initialized
    #[error("SOS module is not initialized")]
    NotInitialized,

    /// The help text has no section for the command
    #[error("Documentation for {0} not found")]
    HelpNotFound(String),

    /// I/O error (for /proc parsing, help text files, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&HostError> for HResult
{
    fn from(error: &HostError) -> Self
    {
        match error {
            HostError::InvalidArgument(_) => HResult::E_INVALIDARG,
            HostError::NotSupported(_) | HostError::CommandNotFound(_) => HResult::E_NOTIMPL,
            HostError::Com(ComError::NoInterface(_)) => HResult::E_NOINTERFACE,
            HostError::InitializationFailed(hresult) | HostError::CommandFailed { hresult, .. } => *hresult,
            _ => HResult::E_FAIL,
        }
    }
}

/// Convenience type alias for `Result<T, HostError>`
///
/// ```rust
/// use soshost_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, HostError>;
