//! Build script for soshost-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (panics in `extern "system"` callbacks must abort)
//! - Supported host operating system for loading the SOS module
//!
//! ## Requirements
//!
//! - **Rust**: 1.81.0 or newer
//! - **Windows**: `sos.dll`, PSS snapshot APIs (Windows 8.1+)
//! - **Linux**: `libsos.so`, `process_vm_readv` (kernel 3.2+)
//! - **macOS**: `libsos.dylib` (module loading only)

fn main()
{
    // Unwinding out of an `extern "system"` function is only guaranteed to
    // abort since 1.81. Every vtable thunk relies on that.
    match (rustc_version::version(), rustc_version::Version::parse("1.81.0")) {
        (Ok(rustc_version), Ok(min_rust_version)) => {
            if rustc_version < min_rust_version {
                panic!(
                    "soshost-core requires Rust {} or newer, found {}",
                    min_rust_version, rustc_version
                );
            }
        }
        _ => println!("cargo:warning=could not verify Rust version"),
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if !matches!(target_os.as_str(), "windows" | "linux" | "macos") {
        println!(
            "cargo:warning=soshost-core has no SOS module naming for target os '{}'",
            target_os
        );
    }
}
