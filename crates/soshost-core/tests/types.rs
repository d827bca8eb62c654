//! Tests for the target-description types

use soshost_core::types::{Address, Architecture, ModuleInfo, OperatingSystem, ProcessId, ThreadId};

#[test]
fn test_process_id_round_trip()
{
    let pid = ProcessId::from(12345);
    assert_eq!(u32::from(pid), 12345);
    assert_eq!(pid, ProcessId(12345));
}

#[test]
fn test_thread_id_display_is_hex()
{
    assert_eq!(ThreadId(0x51).to_string(), "0x51");
    assert_eq!(ThreadId::from(7).raw(), 7);
}

#[test]
fn test_address_display()
{
    assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
    assert_eq!(u64::from(Address::from(0xdead_u64)), 0xdead);
}

#[test]
fn test_sign_extension_mask_follows_pointer_size()
{
    assert_eq!(Address::sign_extension_mask(4), 0xFFFF_FFFF);
    assert_eq!(Address::sign_extension_mask(8), u64::MAX);

    let mask = Address::sign_extension_mask(Architecture::X86.pointer_size());
    assert_eq!(Address::new(0xFFFF_FFFF_8000_1234).masked(mask), Address::new(0x8000_1234));
    let mask = Address::sign_extension_mask(Architecture::X86_64.pointer_size());
    assert_eq!(Address::new(0xFFFF_FFFF_8000_1234).masked(mask), Address::new(0xFFFF_FFFF_8000_1234));
}

#[test]
fn test_address_arithmetic()
{
    let base = Address::new(0x1000);
    assert_eq!(base + 0x10, Address::new(0x1010));
    assert_eq!(base - 0x10, Address::new(0x0ff0));
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    assert!(Address::new(0x1fff).is_within(base, 0x1000));
    assert!(!Address::new(0x2000).is_within(base, 0x1000));
    assert!(!Address::new(0x0fff).is_within(base, 0x1000));
}

#[test]
fn test_architecture_machine_values()
{
    assert_eq!(Architecture::X86.image_file_machine(), 0x014c);
    assert_eq!(Architecture::X86_64.image_file_machine(), 0x8664);
    assert_eq!(Architecture::Arm.image_file_machine(), 0x01c4);
    assert_eq!(Architecture::Arm64.image_file_machine(), 0xaa64);
    assert_eq!(Architecture::Unknown("riscv64").image_file_machine(), 0);
}

#[test]
fn test_minimum_context_size_covers_context_flags()
{
    assert_eq!(Architecture::X86_64.minimum_context_size(), 0x34);
    assert_eq!(Architecture::X86.minimum_context_size(), 4);
    assert_eq!(Architecture::Arm64.minimum_context_size(), 4);
}

#[test]
fn test_operating_system_native_values()
{
    assert_eq!(OperatingSystem::Unknown as u32, 0);
    assert_eq!(OperatingSystem::Windows as u32, 1);
    assert_eq!(OperatingSystem::Linux as u32, 2);
    assert_eq!(OperatingSystem::OSX as u32, 3);
    assert_eq!(OperatingSystem::Linux.rid_name(), Some("linux"));
    assert_eq!(OperatingSystem::Unknown.rid_name(), None);
}

#[test]
fn test_module_contains()
{
    let module = ModuleInfo::new(0, Address::new(0x40_0000), 0x1000, "/app/app");
    assert!(module.contains(Address::new(0x40_0000)));
    assert!(module.contains(Address::new(0x40_0fff)));
    assert!(!module.contains(Address::new(0x40_1000)));
    assert_eq!(module.timestamp, None);
}
