//! # Host Configuration
//!
//! Explicit settings for one host instance, read once from the environment
//! and overridable by the caller (the CLI maps its flags onto the setters).
//!
//! ## Environment Variables
//!
//! - `SOSHOST_SOS_DIR`: directory holding the SOS module (default: the
//!   runtime-identifier folder next to the running executable)
//! - `SOSHOST_TEMP_DIR`: directory reported by `ITarget::GetTempDirectory`
//!   (default: the OS temp directory)
//! - `SOSHOST_SNAPSHOT`: `1`/`true` to read from a PSS clone instead of the
//!   live process (Windows only)
//! - `SOSHOST_SUSPEND`: `1`/`true` to suspend every target thread while
//!   attached
//! - `SOSHOST_SYMBOL_PATH`: Windows-style symbol path applied after attach

use std::env;
use std::path::{Path, PathBuf};

use crate::loader::rid;
use crate::platform::AttachMode;

/// Settings for one [`SosHost`](crate::SosHost)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig
{
    sos_directory: PathBuf,
    temp_directory: PathBuf,
    snapshot: bool,
    suspend: bool,
    symbol_path: Option<String>,
}

impl HostConfig
{
    /// Defaults without consulting the environment
    pub fn new() -> Self
    {
        Self {
            sos_directory: default_sos_directory(),
            temp_directory: env::temp_dir(),
            snapshot: false,
            suspend: false,
            symbol_path: None,
        }
    }

    /// Defaults overridden by the `SOSHOST_*` environment variables
    pub fn from_env() -> Self
    {
        let mut config = Self::new();
        if let Some(dir) = env::var_os("SOSHOST_SOS_DIR").filter(|value| !value.is_empty()) {
            config.sos_directory = PathBuf::from(dir);
        }
        if let Some(dir) = env::var_os("SOSHOST_TEMP_DIR").filter(|value| !value.is_empty()) {
            config.temp_directory = PathBuf::from(dir);
        }
        if let Ok(value) = env::var("SOSHOST_SNAPSHOT") {
            config.snapshot = parse_flag(&value);
        }
        if let Ok(value) = env::var("SOSHOST_SUSPEND") {
            config.suspend = parse_flag(&value);
        }
        config.symbol_path = env::var("SOSHOST_SYMBOL_PATH").ok().filter(|path| !path.trim().is_empty());
        config
    }

    /// Directory the SOS module and `sosdocsunix.txt` are loaded from
    pub fn sos_directory(&self) -> &Path
    {
        &self.sos_directory
    }

    pub fn with_sos_directory(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.sos_directory = dir.into();
        self
    }

    /// Directory handed to the plugin for temporary files
    pub fn temp_directory(&self) -> &Path
    {
        &self.temp_directory
    }

    pub fn with_temp_directory(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.temp_directory = dir.into();
        self
    }

    /// Whether to read from a process snapshot instead of the live process
    pub fn snapshot(&self) -> bool
    {
        self.snapshot
    }

    pub fn with_snapshot(mut self, snapshot: bool) -> Self
    {
        self.snapshot = snapshot;
        self
    }

    /// Whether to keep the target's threads suspended while attached
    pub fn suspend(&self) -> bool
    {
        self.suspend
    }

    pub fn with_suspend(mut self, suspend: bool) -> Self
    {
        self.suspend = suspend;
        self
    }

    /// How to attach; a snapshot wins over suspension
    pub fn attach_mode(&self) -> AttachMode
    {
        if self.snapshot {
            AttachMode::Snapshot
        } else if self.suspend {
            AttachMode::Suspend
        } else {
            AttachMode::Passive
        }
    }

    /// Symbol path to parse once the host is up
    pub fn symbol_path(&self) -> Option<&str>
    {
        self.symbol_path.as_deref()
    }

    pub fn with_symbol_path(mut self, path: impl Into<String>) -> Self
    {
        self.symbol_path = Some(path.into());
        self
    }
}

impl Default for HostConfig
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// `<directory of the running executable>/<rid>`
///
/// Falls back to the current directory when the executable path or the
/// runtime identifier cannot be determined.
pub fn default_sos_directory() -> PathBuf
{
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    match rid::current() {
        Ok(rid) => exe_dir.join(rid),
        Err(_) => exe_dir,
    }
}

fn parse_flag(value: &str) -> bool
{
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_setters_override_defaults()
    {
        let config = HostConfig::new()
            .with_sos_directory("/opt/sos")
            .with_temp_directory("/var/tmp")
            .with_snapshot(true)
            .with_symbol_path("srv*");
        assert_eq!(config.sos_directory(), Path::new("/opt/sos"));
        assert_eq!(config.temp_directory(), Path::new("/var/tmp"));
        assert!(config.snapshot());
        assert_eq!(config.symbol_path(), Some("srv*"));
    }

    #[test]
    fn test_attach_mode_prefers_snapshot()
    {
        assert_eq!(HostConfig::new().attach_mode(), AttachMode::Passive);
        assert_eq!(HostConfig::new().with_suspend(true).attach_mode(), AttachMode::Suspend);
        assert_eq!(
            HostConfig::new().with_suspend(true).with_snapshot(true).attach_mode(),
            AttachMode::Snapshot
        );
    }

    #[test]
    fn test_default_directory_ends_with_rid()
    {
        if let Ok(rid) = rid::current() {
            assert!(default_sos_directory().ends_with(rid));
        }
    }

    #[test]
    fn test_parse_flag()
    {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
