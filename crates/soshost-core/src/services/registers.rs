//! # Register Layouts
//!
//! Names and byte offsets of the integer registers inside each
//! architecture's native `CONTEXT` structure. `GetValueByName` and the
//! instruction/stack/frame offset slots read registers straight out of the
//! context bytes the thread service returns.

use crate::types::Architecture;

/// One register inside a native context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register
{
    pub name: &'static str,
    /// Byte offset inside `CONTEXT`
    pub offset: usize,
    /// Size in bytes (2, 4 or 8)
    pub size: usize,
}

const fn reg(name: &'static str, offset: usize, size: usize) -> Register
{
    Register { name, offset, size }
}

/// Register table for one architecture
#[derive(Debug)]
pub struct RegisterSet
{
    architecture: &'static str,
    registers: &'static [Register],
    instruction_pointer: Option<usize>,
    stack_pointer: Option<usize>,
    frame_pointer: Option<usize>,
    context_size: usize,
}

impl RegisterSet
{
    /// Layout for `architecture`; unknown architectures get an empty table
    pub fn for_architecture(architecture: Architecture) -> &'static RegisterSet
    {
        match architecture {
            Architecture::X86_64 => &AMD64,
            Architecture::X86 => &X86,
            Architecture::Arm64 => &ARM64,
            Architecture::Arm => &ARM,
            Architecture::Unknown(_) => &EMPTY,
        }
    }

    pub fn architecture(&self) -> &'static str
    {
        self.architecture
    }

    pub fn len(&self) -> usize
    {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.registers.is_empty()
    }

    /// Size in bytes of the full native `CONTEXT`
    pub fn context_size(&self) -> usize
    {
        self.context_size
    }

    pub fn register(&self, index: usize) -> Option<&'static Register>
    {
        self.registers.get(index)
    }

    /// Case-insensitive lookup by name (`rip`, `RIP`, `x29`, ...)
    pub fn index_of(&self, name: &str) -> Option<usize>
    {
        self.registers.iter().position(|register| register.name.eq_ignore_ascii_case(name))
    }

    pub fn instruction_pointer_index(&self) -> Option<usize>
    {
        self.instruction_pointer
    }

    pub fn stack_pointer_index(&self) -> Option<usize>
    {
        self.stack_pointer
    }

    pub fn frame_pointer_index(&self) -> Option<usize>
    {
        self.frame_pointer
    }

    /// Read register `index` out of `context`
    ///
    /// Returns `None` for an unknown index or a context too short to hold
    /// the register.
    pub fn value(&self, context: &[u8], index: usize) -> Option<u64>
    {
        let register = self.registers.get(index)?;
        let bytes = context.get(register.offset..register.offset + register.size)?;
        let mut raw = [0u8; 8];
        raw[..register.size].copy_from_slice(bytes);
        Some(u64::from_le_bytes(raw))
    }
}

static EMPTY: RegisterSet = RegisterSet {
    architecture: "unknown",
    registers: &[],
    instruction_pointer: None,
    stack_pointer: None,
    frame_pointer: None,
    context_size: 0,
};

// winnt.h AMD64 CONTEXT
static AMD64_REGISTERS: [Register; 24] = [
    reg("rax", 0x78, 8),
    reg("rcx", 0x80, 8),
    reg("rdx", 0x88, 8),
    reg("rbx", 0x90, 8),
    reg("rsp", 0x98, 8),
    reg("rbp", 0xA0, 8),
    reg("rsi", 0xA8, 8),
    reg("rdi", 0xB0, 8),
    reg("r8", 0xB8, 8),
    reg("r9", 0xC0, 8),
    reg("r10", 0xC8, 8),
    reg("r11", 0xD0, 8),
    reg("r12", 0xD8, 8),
    reg("r13", 0xE0, 8),
    reg("r14", 0xE8, 8),
    reg("r15", 0xF0, 8),
    reg("rip", 0xF8, 8),
    reg("cs", 0x38, 2),
    reg("ds", 0x3A, 2),
    reg("es", 0x3C, 2),
    reg("fs", 0x3E, 2),
    reg("gs", 0x40, 2),
    reg("ss", 0x42, 2),
    reg("efl", 0x44, 4),
];

static AMD64: RegisterSet = RegisterSet {
    architecture: "x64",
    registers: &AMD64_REGISTERS,
    instruction_pointer: Some(16),
    stack_pointer: Some(4),
    frame_pointer: Some(5),
    context_size: 0x4D0,
};

// winnt.h X86 CONTEXT
static X86_REGISTERS: [Register; 16] = [
    reg("gs", 0x8C, 4),
    reg("fs", 0x90, 4),
    reg("es", 0x94, 4),
    reg("ds", 0x98, 4),
    reg("edi", 0x9C, 4),
    reg("esi", 0xA0, 4),
    reg("ebx", 0xA4, 4),
    reg("edx", 0xA8, 4),
    reg("ecx", 0xAC, 4),
    reg("eax", 0xB0, 4),
    reg("ebp", 0xB4, 4),
    reg("eip", 0xB8, 4),
    reg("cs", 0xBC, 4),
    reg("efl", 0xC0, 4),
    reg("esp", 0xC4, 4),
    reg("ss", 0xC8, 4),
];

static X86: RegisterSet = RegisterSet {
    architecture: "x86",
    registers: &X86_REGISTERS,
    instruction_pointer: Some(11),
    stack_pointer: Some(14),
    frame_pointer: Some(10),
    context_size: 0x2CC,
};

// winnt.h ARM64_NT_CONTEXT
static ARM64_REGISTERS: [Register; 34] = [
    reg("x0", 0x08, 8),
    reg("x1", 0x10, 8),
    reg("x2", 0x18, 8),
    reg("x3", 0x20, 8),
    reg("x4", 0x28, 8),
    reg("x5", 0x30, 8),
    reg("x6", 0x38, 8),
    reg("x7", 0x40, 8),
    reg("x8", 0x48, 8),
    reg("x9", 0x50, 8),
    reg("x10", 0x58, 8),
    reg("x11", 0x60, 8),
    reg("x12", 0x68, 8),
    reg("x13", 0x70, 8),
    reg("x14", 0x78, 8),
    reg("x15", 0x80, 8),
    reg("x16", 0x88, 8),
    reg("x17", 0x90, 8),
    reg("x18", 0x98, 8),
    reg("x19", 0xA0, 8),
    reg("x20", 0xA8, 8),
    reg("x21", 0xB0, 8),
    reg("x22", 0xB8, 8),
    reg("x23", 0xC0, 8),
    reg("x24", 0xC8, 8),
    reg("x25", 0xD0, 8),
    reg("x26", 0xD8, 8),
    reg("x27", 0xE0, 8),
    reg("x28", 0xE8, 8),
    reg("fp", 0xF0, 8),
    reg("lr", 0xF8, 8),
    reg("sp", 0x100, 8),
    reg("pc", 0x108, 8),
    reg("cpsr", 0x04, 4),
];

static ARM64: RegisterSet = RegisterSet {
    architecture: "arm64",
    registers: &ARM64_REGISTERS,
    instruction_pointer: Some(32),
    stack_pointer: Some(31),
    frame_pointer: Some(29),
    context_size: 0x390,
};

// winnt.h ARM CONTEXT (Thumb-2); r11 is the frame pointer
static ARM_REGISTERS: [Register; 17] = [
    reg("r0", 0x04, 4),
    reg("r1", 0x08, 4),
    reg("r2", 0x0C, 4),
    reg("r3", 0x10, 4),
    reg("r4", 0x14, 4),
    reg("r5", 0x18, 4),
    reg("r6", 0x1C, 4),
    reg("r7", 0x20, 4),
    reg("r8", 0x24, 4),
    reg("r9", 0x28, 4),
    reg("r10", 0x2C, 4),
    reg("r11", 0x30, 4),
    reg("r12", 0x34, 4),
    reg("sp", 0x38, 4),
    reg("lr", 0x3C, 4),
    reg("pc", 0x40, 4),
    reg("cpsr", 0x44, 4),
];

static ARM: RegisterSet = RegisterSet {
    architecture: "arm",
    registers: &ARM_REGISTERS,
    instruction_pointer: Some(15),
    stack_pointer: Some(13),
    frame_pointer: Some(11),
    context_size: 0x1A0,
};

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_special_register_indexes()
    {
        for architecture in [Architecture::X86_64, Architecture::X86, Architecture::Arm64, Architecture::Arm] {
            let set = RegisterSet::for_architecture(architecture);
            let ip = set.instruction_pointer_index().and_then(|index| set.register(index));
            let sp = set.stack_pointer_index().and_then(|index| set.register(index));
            assert!(ip.is_some(), "{}", set.architecture());
            assert!(sp.is_some(), "{}", set.architecture());
            for register in set.registers {
                assert!(register.offset + register.size <= set.context_size());
            }
        }
        assert_eq!(RegisterSet::for_architecture(Architecture::X86_64).register(16).map(|r| r.name), Some("rip"));
        assert_eq!(RegisterSet::for_architecture(Architecture::Arm64).register(32).map(|r| r.name), Some("pc"));
        assert_eq!(RegisterSet::for_architecture(Architecture::X86).register(14).map(|r| r.name), Some("esp"));
    }

    #[test]
    fn test_value_reads_little_endian()
    {
        let set = RegisterSet::for_architecture(Architecture::X86_64);
        let mut context = vec![0u8; set.context_size()];
        context[0xF8..0x100].copy_from_slice(&0x7ff6_1234_5678_u64.to_le_bytes());
        context[0x44..0x48].copy_from_slice(&0x246_u32.to_le_bytes());

        assert_eq!(set.index_of("RIP"), Some(16));
        assert_eq!(set.value(&context, 16), Some(0x7ff6_1234_5678));
        assert_eq!(set.value(&context, set.index_of("efl").unwrap_or(usize::MAX)), Some(0x246));
        assert_eq!(set.value(&context[..0x80], 16), None);
        assert_eq!(set.index_of("xmm0"), None);
    }

    #[test]
    fn test_unknown_architecture_is_empty()
    {
        let set = RegisterSet::for_architecture(Architecture::Unknown("riscv64"));
        assert!(set.is_empty());
        assert_eq!(set.instruction_pointer_index(), None);
    }
}
