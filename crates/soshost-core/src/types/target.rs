//! Process, thread, architecture and operating system types.

use std::fmt;

/// Process identifier (PID)
///
/// ## Example
///
/// ```rust
/// use soshost_core::types::ProcessId;
///
/// let pid = ProcessId::from(4242);
/// assert_eq!(u32::from(pid), 4242);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Operating-system thread identifier (TID on Linux, thread id on Windows)
///
/// This is the "system id" in dbgeng terms, as opposed to the engine's
/// zero-based thread index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl ThreadId
{
    pub fn raw(self) -> u32
    {
        self.0
    }
}

impl From<u32> for ThreadId
{
    fn from(value: u32) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#x}", self.0)
    }
}

/// `IMAGE_FILE_MACHINE_*` values reported by `GetMachineType`
pub mod image_file_machine
{
    pub const UNKNOWN: u32 = 0;
    pub const I386: u32 = 0x014c;
    pub const ARMNT: u32 = 0x01c4;
    pub const AMD64: u32 = 0x8664;
    pub const ARM64: u32 = 0xaa64;
}

/// CPU architecture of the target process
///
/// The adapters always consult the *target's* architecture; the host may
/// differ (e.g. an x64 host reading an ARM64 dump).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 32-bit x86
    X86,
    /// 64-bit x86 (AMD64)
    X86_64,
    /// 32-bit ARM (Thumb-2)
    Arm,
    /// 64-bit ARM
    Arm64,
    /// Any other architecture
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the running host binary
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "arm")]
        {
            Architecture::Arm
        }

        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "arm", target_arch = "aarch64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes for this architecture.
    pub const fn pointer_size(self) -> usize
    {
        match self {
            Architecture::X86 | Architecture::Arm => 4,
            Architecture::X86_64 | Architecture::Arm64 | Architecture::Unknown(_) => 8,
        }
    }

    /// The `IMAGE_FILE_MACHINE_*` value for this architecture
    pub const fn image_file_machine(self) -> u32
    {
        match self {
            Architecture::X86 => image_file_machine::I386,
            Architecture::X86_64 => image_file_machine::AMD64,
            Architecture::Arm => image_file_machine::ARMNT,
            Architecture::Arm64 => image_file_machine::ARM64,
            Architecture::Unknown(_) => image_file_machine::UNKNOWN,
        }
    }

    /// Byte offset of the `ContextFlags` field in this architecture's `CONTEXT`
    ///
    /// AMD64 places it after the six home-register slots; every other
    /// layout starts with it.
    pub const fn context_flags_offset(self) -> usize
    {
        match self {
            Architecture::X86_64 => 0x30,
            _ => 0,
        }
    }

    /// Smallest context buffer that can hold the `ContextFlags` field
    pub const fn minimum_context_size(self) -> usize
    {
        self.context_flags_offset() + 4
    }

    /// Runtime-identifier architecture component (`x64`, `arm64`, ...)
    pub const fn rid_name(self) -> &'static str
    {
        match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
            Architecture::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Arm => write!(f, "arm"),
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Operating system of the target
///
/// The discriminants are the values `ITarget::GetOperatingSystem` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OperatingSystem
{
    Unknown = 0,
    Windows = 1,
    Linux = 2,
    OSX = 3,
}

impl OperatingSystem
{
    /// Operating system of the running host
    pub const fn current() -> Self
    {
        if cfg!(windows) {
            OperatingSystem::Windows
        } else if cfg!(target_os = "linux") {
            OperatingSystem::Linux
        } else if cfg!(target_os = "macos") {
            OperatingSystem::OSX
        } else {
            OperatingSystem::Unknown
        }
    }

    /// Runtime-identifier OS component (`win`, `linux`, `osx`)
    pub const fn rid_name(self) -> Option<&'static str>
    {
        match self {
            OperatingSystem::Windows => Some("win"),
            OperatingSystem::Linux => Some("linux"),
            OperatingSystem::OSX => Some("osx"),
            OperatingSystem::Unknown => None,
        }
    }
}

impl fmt::Display for OperatingSystem
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            OperatingSystem::Windows => write!(f, "Windows"),
            OperatingSystem::Linux => write!(f, "Linux"),
            OperatingSystem::OSX => write!(f, "OSX"),
            OperatingSystem::Unknown => write!(f, "Unknown"),
        }
    }
}
