//! Module and thread descriptions returned by the services.

use std::path::Path;

use super::{Address, ThreadId};

/// Timestamp reported when a module has none
pub const INVALID_TIMESTAMP: u32 = 0xFFFF_FFFE;
/// Checksum reported when a module has none
pub const INVALID_CHECKSUM: u32 = 0xFFFF_FFFF;

/// Four-part file version (`major.minor.build.revision`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleVersion
{
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl ModuleVersion
{
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self
    {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// `dwFileVersionMS`: major in the high word, minor in the low word
    pub const fn version_ms(self) -> u32
    {
        (self.major as u32) << 16 | self.minor as u32
    }

    /// `dwFileVersionLS`: build in the high word, revision in the low word
    pub const fn version_ls(self) -> u32
    {
        (self.build as u32) << 16 | self.revision as u32
    }
}

/// Native `VS_FIXEDFILEINFO`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VsFixedFileInfo
{
    pub signature: u32,
    pub struct_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

impl VsFixedFileInfo
{
    /// `VS_FFI_SIGNATURE`
    pub const SIGNATURE: u32 = 0xFEEF_04BD;

    /// Info block carrying `version` as both file and product version
    pub fn from_version(version: ModuleVersion) -> Self
    {
        Self {
            signature: Self::SIGNATURE,
            struct_version: 0x0001_0000,
            file_version_ms: version.version_ms(),
            file_version_ls: version.version_ls(),
            product_version_ms: version.version_ms(),
            product_version_ls: version.version_ls(),
            ..Self::default()
        }
    }
}

/// One loaded module of the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Position in the module service's enumeration order
    pub index: usize,
    /// Load address
    pub image_base: Address,
    /// Mapped size in bytes
    pub image_size: u64,
    /// Full path as recorded by the target
    pub file_name: String,
    /// PE timestamp, when known
    pub timestamp: Option<u32>,
    /// PE checksum, when known
    pub checksum: Option<u32>,
    /// File version, when known
    pub version: Option<ModuleVersion>,
    /// Free-form version string (e.g. "8.0.124.61010 @Commit: ...")
    pub version_string: Option<String>,
}

impl ModuleInfo
{
    pub fn new(index: usize, image_base: Address, image_size: u64, file_name: impl Into<String>) -> Self
    {
        Self {
            index,
            image_base,
            image_size,
            file_name: file_name.into(),
            timestamp: None,
            checksum: None,
            version: None,
            version_string: None,
        }
    }

    /// File name without its directory
    ///
    /// Handles both separators so Windows paths resolve on any host.
    pub fn short_name(&self) -> &str
    {
        self.file_name.rsplit(['/', '\\']).next().unwrap_or(&self.file_name)
    }

    /// File name without directory and extension (the dbgeng "module name")
    pub fn module_name(&self) -> &str
    {
        let short = self.short_name();
        Path::new(short).file_stem().and_then(|stem| stem.to_str()).unwrap_or(short)
    }

    /// Directory portion of the file name, with a trailing separator
    pub fn directory(&self) -> Option<String>
    {
        let short = self.short_name().len();
        let dir_len = self.file_name.len() - short;
        (dir_len > 0).then(|| self.file_name[..dir_len].to_string())
    }

    /// Whether `address` falls inside the mapped image
    pub fn contains(&self, address: Address) -> bool
    {
        address.is_within(self.image_base, self.image_size)
    }
}

/// One thread of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo
{
    /// Position in the thread service's enumeration order
    pub index: usize,
    /// Operating-system thread id
    pub thread_id: ThreadId,
    /// Thread environment block address, when known
    pub teb: Option<Address>,
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_module_names()
    {
        let module = ModuleInfo::new(0, Address::new(0x7f00_0000), 0x1000, "/usr/share/dotnet/shared/libcoreclr.so");
        assert_eq!(module.short_name(), "libcoreclr.so");
        assert_eq!(module.module_name(), "libcoreclr");
        assert_eq!(module.directory().as_deref(), Some("/usr/share/dotnet/shared/"));

        let module = ModuleInfo::new(1, Address::new(0x1000), 0x1000, r"C:\dotnet\coreclr.dll");
        assert_eq!(module.short_name(), "coreclr.dll");
        assert_eq!(module.directory().as_deref(), Some(r"C:\dotnet\"));

        let module = ModuleInfo::new(2, Address::new(0x1000), 0x1000, "a.out");
        assert_eq!(module.directory(), None);
    }

    #[test]
    fn test_version_packing()
    {
        let version = ModuleVersion::new(8, 0, 124, 61010);
        assert_eq!(version.version_ms(), 0x0008_0000);
        assert_eq!(version.version_ls(), (124 << 16) | 61010);
        assert_eq!(VsFixedFileInfo::from_version(version).file_version_ls, version.version_ls());
    }
}
