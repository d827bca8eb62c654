//! # soshost-core
//!
//! Hosting primitives that let a Rust process load the native SOS debugger
//! extension and serve the COM-style interfaces it calls back into.
//!
//! The crate is organised bottom-up:
//! - [`com`]: GUIDs, HRESULTs, the vtable builder and the reference-counted
//!   COM-callable object
//! - [`interfaces`]: generated descriptors (IID + slot list) for every
//!   interface SOS expects
//! - [`services`]: the memory/thread/module/symbol/target services the
//!   adapters consult
//! - [`hosting`]: the interface adapters (data targets, runtime, host,
//!   target, symbol service, LLDB services)
//! - [`loader`]: locating, loading and invoking the SOS module
//! - [`platform`]: live process readers and the thread suspender
//!
//! ## Why unsafe code is needed
//!
//! The native plugin calls through raw function-pointer tables with raw
//! pointer arguments. Every slot is an `unsafe extern "system" fn`, and the
//! OS adapters call Win32/libc APIs directly. The unsafe surface is kept in
//! the thunks and FFI wrappers; everything they delegate to is safe Rust.

#![allow(unsafe_code)] // Required for vtable thunks and OS process APIs

pub mod com;
pub mod config;
pub mod error;
pub mod host;
pub mod hosting;
pub mod interfaces;
pub mod loader;
pub mod platform;
pub mod prelude;
pub mod services;
pub mod types;

pub use config::HostConfig;
// Re-export commonly used types
pub use error::{HostError, Result};
pub use host::SosHost;
pub use types::{Address, Architecture, OperatingSystem, ProcessId};
