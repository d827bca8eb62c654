//! Thread register contexts of a `ptrace`-stopped thread.
//!
//! `PTRACE_GETREGSET` with `NT_PRSTATUS` returns the kernel's general
//! purpose register set (`user_regs_struct` on x86-64, `user_pt_regs` on
//! arm64, `pt_regs` on arm). The words are copied into the native
//! `CONTEXT` layout described by [`RegisterSet`], with `ContextFlags` set
//! to control plus integer (plus segments on x64).
//!
//! Only the thread that attached a tracee may query it, so contexts must be
//! read from the thread that ran the suspension.

use std::io;

use tracing::trace;

use crate::error::{HostError, Result};
use crate::services::RegisterSet;
use crate::types::{Architecture, ThreadId};

/// Large enough for every supported `NT_PRSTATUS` register set
const REGSET_BUFFER_SIZE: usize = 512;

const CONTEXT_AMD64_FULL: u32 = 0x0010_0007;
const CONTEXT_ARM64_FULL: u32 = 0x0040_0003;
const CONTEXT_ARM_FULL: u32 = 0x0020_0003;

// `user_regs_struct`; empty names have no CONTEXT counterpart
const X64_REGSET: [&str; 27] = [
    "r15", "r14", "r13", "r12", "rbp", "rbx", "r11", "r10", "r9", "r8", "rax", "rcx", "rdx", "rsi", "rdi", "",
    "rip", "cs", "efl", "rsp", "ss", "", "", "ds", "es", "fs", "gs",
];

// `user_pt_regs`
const ARM64_REGSET: [&str; 34] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16",
    "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "fp", "lr", "sp", "pc",
    "cpsr",
];

// `pt_regs`: r0-r15, cpsr, orig_r0
const ARM_REGSET: [&str; 18] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr", "pc", "cpsr", "",
];

/// Convert an `NT_PRSTATUS` register set into a native `CONTEXT`
///
/// ## Errors
///
/// - `NotSupported`: no conversion for `architecture` (x86 included)
/// - `InvalidArgument`: `regset` is shorter than the kernel layout
pub fn context_from_regset(architecture: Architecture, regset: &[u8]) -> Result<Vec<u8>>
{
    let (names, word, flags): (&[&str], usize, u32) = match architecture {
        Architecture::X86_64 => (&X64_REGSET, 8, CONTEXT_AMD64_FULL),
        Architecture::Arm64 => (&ARM64_REGSET, 8, CONTEXT_ARM64_FULL),
        Architecture::Arm => (&ARM_REGSET, 4, CONTEXT_ARM_FULL),
        _ => {
            return Err(HostError::NotSupported(format!(
                "thread contexts of {} processes",
                architecture
            )))
        }
    };
    if regset.len() < names.len() * word {
        return Err(HostError::InvalidArgument(format!(
            "{} register set is {} bytes, expected {}",
            architecture,
            regset.len(),
            names.len() * word
        )));
    }

    let set = RegisterSet::for_architecture(architecture);
    let mut context = vec![0u8; set.context_size()];
    let flags_offset = architecture.context_flags_offset();
    context[flags_offset..flags_offset + 4].copy_from_slice(&flags.to_le_bytes());

    for (slot, name) in names.iter().enumerate() {
        let Some(register) = set.index_of(name).and_then(|index| set.register(index)) else {
            continue;
        };
        let value = &regset[slot * word..slot * word + register.size.min(word)];
        context[register.offset..register.offset + value.len()].copy_from_slice(value);
    }
    Ok(context)
}

/// Read the registers of an attached thread as a native `CONTEXT`
///
/// ## Errors
///
/// - `ThreadNotFound`: the thread exited or is not traced by this thread
/// - `Io`: any other `ptrace` failure
/// - anything [`context_from_regset`] returns
pub fn read_thread_context(architecture: Architecture, thread_id: ThreadId) -> Result<Vec<u8>>
{
    let mut regset = [0u8; REGSET_BUFFER_SIZE];
    let mut iov = libc::iovec {
        iov_base: regset.as_mut_ptr().cast(),
        iov_len: regset.len(),
    };
    // SAFETY: `iov` describes `regset`; the kernel shrinks `iov_len` to what it wrote.
    let status = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            thread_id.raw() as libc::pid_t,
            libc::NT_PRSTATUS as usize as *mut libc::c_void,
            (&mut iov as *mut libc::iovec).cast::<libc::c_void>(),
        )
    };
    if status == -1 {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::ESRCH) => HostError::ThreadNotFound(thread_id.raw()),
            _ => HostError::Io(err),
        });
    }
    trace!(thread = %thread_id, bytes = iov.iov_len, "register set read");
    context_from_regset(architecture, &regset[..iov.iov_len.min(regset.len())])
}

#[cfg(test)]
mod tests
{
    use super::*;

    /// Register set whose word `n` holds `base + n`
    fn regset(words: usize, word: usize, base: u64) -> Vec<u8>
    {
        (0..words)
            .flat_map(|slot| (base + slot as u64).to_le_bytes()[..word].to_vec())
            .collect()
    }

    fn value(architecture: Architecture, context: &[u8], name: &str) -> Option<u64>
    {
        let set = RegisterSet::for_architecture(architecture);
        set.value(context, set.index_of(name)?)
    }

    #[test]
    fn test_x64_registers_land_in_the_amd64_context()
    {
        let context = context_from_regset(Architecture::X86_64, &regset(27, 8, 0x1000)).unwrap();
        assert_eq!(context.len(), 0x4D0);
        assert_eq!(&context[0x30..0x34], &CONTEXT_AMD64_FULL.to_le_bytes());
        assert_eq!(value(Architecture::X86_64, &context, "r15"), Some(0x1000));
        assert_eq!(value(Architecture::X86_64, &context, "rbp"), Some(0x1004));
        assert_eq!(value(Architecture::X86_64, &context, "rax"), Some(0x100A));
        assert_eq!(value(Architecture::X86_64, &context, "rip"), Some(0x1010));
        assert_eq!(value(Architecture::X86_64, &context, "efl"), Some(0x1012));
        assert_eq!(value(Architecture::X86_64, &context, "rsp"), Some(0x1013));
        assert_eq!(value(Architecture::X86_64, &context, "cs"), Some(0x1011));
        assert_eq!(value(Architecture::X86_64, &context, "gs"), Some(0x101A));
    }

    #[test]
    fn test_arm64_registers_land_in_the_arm64_context()
    {
        let context = context_from_regset(Architecture::Arm64, &regset(34, 8, 0x2000)).unwrap();
        assert_eq!(&context[..4], &CONTEXT_ARM64_FULL.to_le_bytes());
        assert_eq!(value(Architecture::Arm64, &context, "x0"), Some(0x2000));
        assert_eq!(value(Architecture::Arm64, &context, "fp"), Some(0x201D));
        assert_eq!(value(Architecture::Arm64, &context, "lr"), Some(0x201E));
        assert_eq!(value(Architecture::Arm64, &context, "sp"), Some(0x201F));
        assert_eq!(value(Architecture::Arm64, &context, "pc"), Some(0x2020));
        assert_eq!(value(Architecture::Arm64, &context, "cpsr"), Some(0x2021));
    }

    #[test]
    fn test_arm_registers_land_in_the_arm_context()
    {
        let context = context_from_regset(Architecture::Arm, &regset(18, 4, 0x3000)).unwrap();
        assert_eq!(&context[..4], &CONTEXT_ARM_FULL.to_le_bytes());
        assert_eq!(value(Architecture::Arm, &context, "r11"), Some(0x300B));
        assert_eq!(value(Architecture::Arm, &context, "sp"), Some(0x300D));
        assert_eq!(value(Architecture::Arm, &context, "pc"), Some(0x300F));
        assert_eq!(value(Architecture::Arm, &context, "cpsr"), Some(0x3010));
    }

    #[test]
    fn test_unconvertible_register_sets()
    {
        assert!(matches!(
            context_from_regset(Architecture::X86, &[0u8; 68]),
            Err(HostError::NotSupported(_))
        ));
        assert!(matches!(
            context_from_regset(Architecture::X86_64, &[0u8; 64]),
            Err(HostError::InvalidArgument(_))
        ));
    }
}
