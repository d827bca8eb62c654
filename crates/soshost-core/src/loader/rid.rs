//! .NET runtime identifiers (`linux-x64`, `win-arm64`, ...).
//!
//! SOS ships one build per RID; the host looks for it in a folder named
//! after the RID of the running host.

use crate::error::{HostError, Result};
use crate::types::{Architecture, OperatingSystem};

/// RID of the running host
///
/// ## Errors
///
/// - `NotSupported`: the host operating system has no SOS build
pub fn current() -> Result<String>
{
    let musl = OperatingSystem::current() == OperatingSystem::Linux && is_alpine();
    rid(OperatingSystem::current(), Architecture::current(), musl)
}

/// RID for an explicit OS and architecture
///
/// ## Errors
///
/// - `NotSupported`: `os` is [`OperatingSystem::Unknown`]
pub fn rid(os: OperatingSystem, architecture: Architecture, musl: bool) -> Result<String>
{
    let os_name = os
        .rid_name()
        .ok_or_else(|| HostError::NotSupported(format!("Unsupported operating system {}", std::env::consts::OS)))?;
    let os_name = if musl && os == OperatingSystem::Linux { "linux-musl" } else { os_name };
    Ok(format!("{}-{}", os_name, architecture.rid_name()))
}

fn is_alpine() -> bool
{
    std::fs::read_to_string("/etc/os-release").is_ok_and(|release| release.contains("ID=alpine"))
}
