//! # Runtime Discovery
//!
//! Finds the CLR among the target's modules and locates the DAC and DBI
//! that match it. Both live next to the runtime module unless the user
//! pointed SOS at another directory with `setclrpath`
//! (`IRuntime::SetRuntimeDirectory`).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::types::{ModuleInfo, ModuleVersion, OperatingSystem};

/// Flavor of CLR loaded in the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeType
{
    /// .NET Framework (`clr.dll`)
    Desktop,
    /// .NET Core / .NET 5+ (`coreclr.dll`, `libcoreclr.so`, ...)
    NetCore,
    /// Runtime statically linked into a single-file app
    SingleFile,
    Unknown,
}

/// One CLR instance in the target
pub trait Runtime: Send + Sync
{
    fn runtime_type(&self) -> RuntimeType;

    /// The module hosting the runtime
    fn runtime_module(&self) -> &ModuleInfo;

    /// Directory override set with `setclrpath`, if any
    fn runtime_module_directory(&self) -> Option<String>;

    fn set_runtime_module_directory(&self, directory: Option<String>);

    /// Runtime version, when the module carries one
    fn version(&self) -> Option<ModuleVersion>
    {
        self.runtime_module().version
    }

    /// Local path of the matching DAC, if it exists
    fn dac_file_path(&self) -> Option<PathBuf>;

    /// Local path of the matching DBI, if it exists
    fn dbi_file_path(&self) -> Option<PathBuf>;
}

/// File name of the .NET Core runtime module on `os`
pub fn runtime_module_name(os: OperatingSystem) -> &'static str
{
    match os {
        OperatingSystem::Windows | OperatingSystem::Unknown => "coreclr.dll",
        OperatingSystem::Linux => "libcoreclr.so",
        OperatingSystem::OSX => "libcoreclr.dylib",
    }
}

/// `lib<name>.so`, `lib<name>.dylib` or `<name>.dll`
pub fn platform_module_name(os: OperatingSystem, name: &str) -> String
{
    match os {
        OperatingSystem::Linux => format!("lib{}.so", name),
        OperatingSystem::OSX => format!("lib{}.dylib", name),
        OperatingSystem::Windows | OperatingSystem::Unknown => format!("{}.dll", name),
    }
}

fn dac_file_name(runtime_type: RuntimeType, os: OperatingSystem) -> Option<String>
{
    match (runtime_type, os) {
        (RuntimeType::Desktop, OperatingSystem::Windows) => Some("mscordacwks.dll".to_string()),
        (RuntimeType::Desktop, _) | (RuntimeType::Unknown, _) | (_, OperatingSystem::Unknown) => None,
        (_, os) => Some(platform_module_name(os, "mscordaccore")),
    }
}

fn dbi_file_name(runtime_type: RuntimeType, os: OperatingSystem) -> Option<String>
{
    match (runtime_type, os) {
        (RuntimeType::Unknown, _) | (_, OperatingSystem::Unknown) => None,
        (RuntimeType::Desktop, OperatingSystem::Windows) => Some("mscordbi.dll".to_string()),
        (RuntimeType::Desktop, _) => None,
        (_, os) => Some(platform_module_name(os, "mscordbi")),
    }
}

/// A runtime found by scanning the module list
#[derive(Debug)]
pub struct ClrRuntime
{
    runtime_type: RuntimeType,
    module: ModuleInfo,
    os: OperatingSystem,
    directory_override: Mutex<Option<String>>,
}

impl ClrRuntime
{
    pub fn new(runtime_type: RuntimeType, module: ModuleInfo, os: OperatingSystem) -> Self
    {
        Self {
            runtime_type,
            module,
            os,
            directory_override: Mutex::new(None),
        }
    }

    /// First CLR among `modules`, preferring .NET Core over .NET Framework
    pub fn locate(modules: &[ModuleInfo], os: OperatingSystem) -> Option<Self>
    {
        let core_name = runtime_module_name(os);
        if let Some(module) = modules.iter().find(|module| module.short_name().eq_ignore_ascii_case(core_name)) {
            debug!(module = %module.file_name, "found .NET Core runtime");
            return Some(Self::new(RuntimeType::NetCore, module.clone(), os));
        }
        if os == OperatingSystem::Windows {
            if let Some(module) = modules.iter().find(|module| module.short_name().eq_ignore_ascii_case("clr.dll")) {
                debug!(module = %module.file_name, "found .NET Framework runtime");
                return Some(Self::new(RuntimeType::Desktop, module.clone(), os));
            }
        }
        None
    }

    /// Directory searched for the DAC and DBI
    fn search_directory(&self) -> Option<PathBuf>
    {
        match self.runtime_module_directory() {
            Some(directory) => Some(PathBuf::from(directory)),
            None => self.module.directory().map(PathBuf::from),
        }
    }

    fn local_file(&self, file_name: Option<String>) -> Option<PathBuf>
    {
        let file_name = file_name?;
        let path = self.search_directory()?.join(&file_name);
        if path.is_file() {
            Some(path)
        } else {
            warn!(file = %path.display(), "runtime companion module not found");
            None
        }
    }
}

impl Runtime for ClrRuntime
{
    fn runtime_type(&self) -> RuntimeType
    {
        self.runtime_type
    }

    fn runtime_module(&self) -> &ModuleInfo
    {
        &self.module
    }

    fn runtime_module_directory(&self) -> Option<String>
    {
        self.directory_override.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_runtime_module_directory(&self, directory: Option<String>)
    {
        *self.directory_override.lock().unwrap_or_else(PoisonError::into_inner) = directory;
    }

    fn dac_file_path(&self) -> Option<PathBuf>
    {
        self.local_file(dac_file_name(self.runtime_type, self.os))
    }

    fn dbi_file_path(&self) -> Option<PathBuf>
    {
        self.local_file(dbi_file_name(self.runtime_type, self.os))
    }
}

/// Directory portion of `path` as the plugin expects it (with a trailing separator)
pub fn directory_with_separator(path: &Path) -> String
{
    let mut directory = path.to_string_lossy().into_owned();
    if !directory.ends_with(['/', '\\']) {
        directory.push(std::path::MAIN_SEPARATOR);
    }
    directory
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::Address;

    fn module(index: usize, name: &str) -> ModuleInfo
    {
        ModuleInfo::new(index, Address::new(0x1000 * (index as u64 + 1)), 0x1000, name)
    }

    #[test]
    fn test_locate_prefers_core()
    {
        let modules = vec![
            module(0, r"C:\app\app.exe"),
            module(1, r"C:\Windows\Microsoft.NET\Framework64\v4.0.30319\clr.dll"),
            module(2, r"C:\dotnet\shared\Microsoft.NETCore.App\8.0.0\CoreCLR.dll"),
        ];
        let runtime = ClrRuntime::locate(&modules, OperatingSystem::Windows);
        assert_eq!(runtime.as_ref().map(Runtime::runtime_type), Some(RuntimeType::NetCore));
        assert_eq!(runtime.map(|r| r.runtime_module().index), Some(2));

        let runtime = ClrRuntime::locate(&modules[..2], OperatingSystem::Windows);
        assert_eq!(runtime.map(|r| r.runtime_type()), Some(RuntimeType::Desktop));

        assert!(ClrRuntime::locate(&modules[..2], OperatingSystem::Linux).is_none());
    }

    #[test]
    fn test_companion_file_names()
    {
        assert_eq!(dac_file_name(RuntimeType::NetCore, OperatingSystem::Linux).as_deref(), Some("libmscordaccore.so"));
        assert_eq!(dac_file_name(RuntimeType::NetCore, OperatingSystem::Windows).as_deref(), Some("mscordaccore.dll"));
        assert_eq!(dac_file_name(RuntimeType::Desktop, OperatingSystem::Windows).as_deref(), Some("mscordacwks.dll"));
        assert_eq!(dbi_file_name(RuntimeType::SingleFile, OperatingSystem::OSX).as_deref(), Some("libmscordbi.dylib"));
        assert_eq!(dbi_file_name(RuntimeType::Desktop, OperatingSystem::Linux), None);
    }

    #[test]
    fn test_directory_override()
    {
        let runtime = ClrRuntime::new(RuntimeType::NetCore, module(0, "/nonexistent/libcoreclr.so"), OperatingSystem::Linux);
        assert_eq!(runtime.runtime_module_directory(), None);
        assert_eq!(runtime.dac_file_path(), None);
        runtime.set_runtime_module_directory(Some("/also/missing".to_string()));
        assert_eq!(runtime.runtime_module_directory().as_deref(), Some("/also/missing"));
        assert_eq!(runtime.search_directory(), Some(PathBuf::from("/also/missing")));
    }
}
