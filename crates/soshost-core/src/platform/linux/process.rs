//! # Linux Process Reader
//!
//! Reads a live Linux process through `/proc` and `process_vm_readv`.
//!
//! ## Sources
//!
//! - `/proc/<pid>/exe`: ELF header, for the architecture check
//! - `/proc/<pid>/task`: thread ids
//! - `/proc/<pid>/maps`: file-backed mappings, grouped into modules
//! - `process_vm_readv(2)` / `process_vm_writev(2)`: memory
//!
//! Register contexts need the thread to be `ptrace`-stopped, so a passive
//! reader's [`thread_context`](ProcessReader::thread_context) reports
//! `NotSupported`; attaching with [`AttachMode::Suspend`] reads them
//! through [`super::context`].
//!
//! [`AttachMode::Suspend`]: crate::platform::AttachMode::Suspend

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use object::elf::{EM_386, EM_AARCH64, EM_ARM, EM_X86_64};
use tracing::debug;

use crate::error::{HostError, Result};
use crate::platform::live::ProcessReader;
use crate::types::{Address, Architecture, ModuleInfo, OperatingSystem, ProcessId, ThreadId};

/// `e_machine` lives at this offset in both ELF classes
const E_MACHINE_OFFSET: usize = 18;
const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const ELFDATA2LSB: u8 = 1;

/// [`ProcessReader`] for a Linux process
#[derive(Debug)]
pub struct LinuxProcessReader
{
    pid: u32,
    architecture: Architecture,
}

impl LinuxProcessReader
{
    /// Open `pid` for reading
    ///
    /// ## Errors
    ///
    /// - `ProcessNotFound`: `/proc/<pid>` does not exist
    /// - `ArchitectureMismatch`: the target executable is not built for the host architecture
    pub fn open(pid: u32) -> Result<Self>
    {
        let proc_dir = proc_path(pid, "");
        if !proc_dir.exists() {
            return Err(HostError::ProcessNotFound(pid));
        }

        // An unreadable executable (another user's process) skips the check;
        // reads fail later with a clearer error.
        let architecture = match read_elf_header(pid) {
            Some(header) => architecture_from_elf(&header),
            None => Architecture::current(),
        };
        if architecture != Architecture::current() {
            debug!(pid, %architecture, host = %Architecture::current(), "architecture mismatch");
            return Err(HostError::ArchitectureMismatch);
        }
        Ok(Self { pid, architecture })
    }

    fn transfer_failed(&self, address: Address, size: usize, write: bool) -> HostError
    {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return HostError::ProcessNotFound(self.pid);
        }
        if write {
            HostError::WriteFailed { address, size }
        } else {
            HostError::ReadFailed { address, size }
        }
    }
}

fn proc_path(pid: u32, entry: &str) -> PathBuf
{
    let mut path = PathBuf::from(format!("/proc/{}", pid));
    if !entry.is_empty() {
        path.push(entry);
    }
    path
}

fn read_elf_header(pid: u32) -> Option<[u8; 20]>
{
    let mut header = [0u8; 20];
    let mut file = fs::File::open(proc_path(pid, "exe")).ok()?;
    file.read_exact(&mut header).ok()?;
    Some(header)
}

/// Architecture named by an ELF header's `e_machine`
pub fn architecture_from_elf(header: &[u8]) -> Architecture
{
    if header.len() < E_MACHINE_OFFSET + 2 || &header[..4] != ELF_MAGIC {
        return Architecture::Unknown("not an ELF image");
    }
    let bytes = [header[E_MACHINE_OFFSET], header[E_MACHINE_OFFSET + 1]];
    let machine = if header[5] == ELFDATA2LSB {
        u16::from_le_bytes(bytes)
    } else {
        u16::from_be_bytes(bytes)
    };
    match machine {
        EM_386 => Architecture::X86,
        EM_X86_64 => Architecture::X86_64,
        EM_ARM => Architecture::Arm,
        EM_AARCH64 => Architecture::Arm64,
        _ => Architecture::Unknown("unrecognised e_machine"),
    }
}

/// Thread ids listed under `/proc/<pid>/task`
pub(crate) fn task_ids(pid: u32) -> Result<Vec<ThreadId>>
{
    let entries = fs::read_dir(proc_path(pid, "task")).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => HostError::ProcessNotFound(pid),
        _ => HostError::Io(err),
    })?;
    let mut threads: Vec<ThreadId> = entries
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
        .map(ThreadId)
        .collect();
    threads.sort_unstable_by_key(|thread| thread.raw());
    Ok(threads)
}

/// Group the file-backed lines of a `maps` file into modules
///
/// Consecutive mappings of the same path form one module spanning from
/// the lowest start to the highest end. Anonymous and pseudo mappings
/// (`[heap]`, `[vdso]`, ...) are skipped.
pub fn parse_maps(maps: &str) -> Vec<ModuleInfo>
{
    let mut modules: Vec<ModuleInfo> = Vec::new();
    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let Some(range) = fields.next() else {
            continue;
        };
        // perms, offset, dev, inode
        let path = fields.nth(4).unwrap_or("");
        if !path.starts_with('/') {
            continue;
        }
        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16)) else {
            continue;
        };

        match modules.last_mut() {
            Some(last) if last.file_name == path => {
                let base = last.image_base.value().min(start);
                let top = (last.image_base.value() + last.image_size).max(end);
                last.image_base = Address::new(base);
                last.image_size = top - base;
            }
            _ => modules.push(ModuleInfo::new(modules.len(), Address::new(start), end - start, path)),
        }
    }
    modules
}

impl ProcessReader for LinuxProcessReader
{
    fn process_id(&self) -> ProcessId
    {
        ProcessId(self.pid)
    }

    fn operating_system(&self) -> OperatingSystem
    {
        OperatingSystem::Linux
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<usize>
    {
        if buffer.is_empty() {
            return Ok(0);
        }
        let local = libc::iovec {
            iov_base: buffer.as_mut_ptr().cast(),
            iov_len: buffer.len(),
        };
        let remote = libc::iovec {
            iov_base: address.value() as usize as *mut libc::c_void,
            iov_len: buffer.len(),
        };
        // SAFETY: `local` covers exactly `buffer`; the remote side is only read by the kernel.
        let read = unsafe { libc::process_vm_readv(self.pid as libc::pid_t, &local, 1, &remote, 1, 0) };
        if read <= 0 {
            return Err(self.transfer_failed(address, buffer.len(), false));
        }
        Ok(read as usize)
    }

    fn write(&self, address: Address, data: &[u8]) -> Result<usize>
    {
        if data.is_empty() {
            return Ok(0);
        }
        let local = libc::iovec {
            iov_base: data.as_ptr().cast_mut().cast(),
            iov_len: data.len(),
        };
        let remote = libc::iovec {
            iov_base: address.value() as usize as *mut libc::c_void,
            iov_len: data.len(),
        };
        // SAFETY: the kernel only reads from `local`, which covers exactly `data`.
        let written = unsafe { libc::process_vm_writev(self.pid as libc::pid_t, &local, 1, &remote, 1, 0) };
        if written <= 0 {
            return Err(self.transfer_failed(address, data.len(), true));
        }
        Ok(written as usize)
    }

    fn thread_ids(&self) -> Result<Vec<ThreadId>>
    {
        task_ids(self.pid)
    }

    fn thread_context(&self, _thread_id: ThreadId) -> Result<Vec<u8>>
    {
        Err(HostError::NotSupported(
            "thread contexts of a running Linux process (attach with --suspend)".to_string(),
        ))
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>>
    {
        let maps = fs::read_to_string(proc_path(self.pid, "maps"))?;
        Ok(parse_maps(&maps))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const MAPS: &str = "\
55d0c0a00000-55d0c0a01000 r--p 00000000 08:01 1311 /usr/bin/app
55d0c0a01000-55d0c0a02000 r-xp 00001000 08:01 1311 /usr/bin/app
55d0c1f5e000-55d0c1f7f000 rw-p 00000000 00:00 0 [heap]
7f1a2b000000-7f1a2b200000 r--p 00000000 08:01 2048 /usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0/libcoreclr.so
7f1a2b200000-7f1a2b600000 r-xp 00200000 08:01 2048 /usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0/libcoreclr.so
7f1a2b600000-7f1a2b700000 rw-p 00000000 00:00 0
7ffd1e3fe000-7ffd1e400000 r-xp 00000000 00:00 0 [vdso]
";

    #[test]
    fn test_parse_maps_groups_file_mappings()
    {
        let modules = parse_maps(MAPS);
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].file_name, "/usr/bin/app");
        assert_eq!(modules[0].image_base, Address::new(0x55d0_c0a0_0000));
        assert_eq!(modules[0].image_size, 0x2000);
        assert_eq!(modules[1].short_name(), "libcoreclr.so");
        assert_eq!(modules[1].image_size, 0x60_0000);
        assert_eq!(modules[1].index, 1);
    }

    #[test]
    fn test_parse_maps_ignores_malformed_lines()
    {
        assert!(parse_maps("garbage\n\nzz-yy r--p 0 0:0 1 /lib/x.so\n").is_empty());
    }

    #[test]
    fn test_architecture_from_elf()
    {
        let mut header = [0u8; 20];
        header[..4].copy_from_slice(ELF_MAGIC);
        header[5] = ELFDATA2LSB;
        header[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        assert_eq!(architecture_from_elf(&header), Architecture::X86_64);
        header[18..20].copy_from_slice(&EM_AARCH64.to_le_bytes());
        assert_eq!(architecture_from_elf(&header), Architecture::Arm64);
        assert!(matches!(architecture_from_elf(b"MZ"), Architecture::Unknown(_)));
    }

    #[test]
    fn test_open_self_and_read_own_memory()
    {
        let reader = LinuxProcessReader::open(std::process::id()).unwrap();
        let value = 0x1122_3344_5566_7788u64;
        let mut buffer = [0u8; 8];
        let read = reader.read(Address::new(&value as *const u64 as u64), &mut buffer).unwrap();
        assert_eq!(read, 8);
        assert_eq!(u64::from_ne_bytes(buffer), value);
        assert!(!reader.thread_ids().unwrap().is_empty());
        assert!(!reader.modules().unwrap().is_empty());
    }

    #[test]
    fn test_open_missing_process()
    {
        assert!(matches!(LinuxProcessReader::open(u32::MAX - 1), Err(HostError::ProcessNotFound(_))));
    }
}
