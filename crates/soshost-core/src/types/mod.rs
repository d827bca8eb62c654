//! # Types
//!
//! Plain data shared by the services, the adapters and the OS readers.

pub mod address;
pub mod module;
pub mod target;

// Re-export all public types
pub use address::Address;
pub use module::{ModuleInfo, ModuleVersion, ThreadInfo, VsFixedFileInfo, INVALID_CHECKSUM, INVALID_TIMESTAMP};
pub use target::{image_file_machine, Architecture, OperatingSystem, ProcessId, ThreadId};
