//! # Interface Catalogue
//!
//! Every interface the SOS module calls into, as a flat slot list in native
//! vtable order. Derived interfaces name their base and only list their own
//! slots; [`InterfaceDescriptor::slot_names`](crate::com::InterfaceDescriptor::slot_names)
//! flattens the chain.
//!
//! The adapters in [`hosting`](crate::hosting) build their vtables with
//! validation on, so a slot added or forgotten there fails construction
//! instead of shifting every later slot.

use crate::com::Guid;
use crate::declare_interface;

// ----------------------------------------------------------------------------
// DAC data target (clrdata.idl)
// ----------------------------------------------------------------------------

declare_interface! {
    /// `ICLRDataTarget`: memory, thread and module access for the DAC
    pub static ICLR_DATA_TARGET: "ICLRDataTarget" = 0x3E11CCEE_D08B_43e5_AF01_32717A64DA03 {
        GetMachineType,
        GetPointerSize,
        GetImageBase,
        ReadVirtual,
        WriteVirtual,
        GetTLSValue,
        SetTLSValue,
        GetCurrentThreadID,
        GetThreadContext,
        SetThreadContext,
        Request,
    }
}

declare_interface! {
    /// `ICLRDataTarget2`: adds remote allocation
    pub static ICLR_DATA_TARGET2: "ICLRDataTarget2" = 0x6d05fae3_189c_4630_a6dc_1c251e1c01ab : ICLR_DATA_TARGET {
        AllocVirtual,
        FreeVirtual,
    }
}

declare_interface! {
    pub static ICLR_DATA_TARGET4: "ICLRDataTarget4" = 0xE799DC06_E099_4713_BDD9_906D3CC02CF2 {
        VirtualUnwind,
    }
}

declare_interface! {
    pub static ICLR_METADATA_LOCATOR: "ICLRMetadataLocator" = 0xaa8fa804_bc05_4642_b2c5_c353ed22fc63 {
        GetMetadata,
    }
}

declare_interface! {
    pub static ICLR_RUNTIME_LOCATOR: "ICLRRuntimeLocator" = 0xb760bf44_9377_4597_8be7_58083bdc5146 {
        GetRuntimeBase,
    }
}

// ----------------------------------------------------------------------------
// DBI data target (cordebug.idl)
// ----------------------------------------------------------------------------

declare_interface! {
    /// `ICorDebugDataTarget`: read-only target access for DBI
    pub static ICORDEBUG_DATA_TARGET: "ICorDebugDataTarget" = 0xFE06DC28_49FB_4636_A4A3_E80DB4AE116C {
        GetPlatform,
        ReadVirtual,
        GetThreadContext,
    }
}

declare_interface! {
    pub static ICORDEBUG_DATA_TARGET4: "ICorDebugDataTarget4" = 0xE799DC06_E099_4713_BDD9_906D3CC02CF2 {
        VirtualUnwind,
    }
}

declare_interface! {
    /// `ICorDebugMutableDataTarget`: derives from `ICorDebugDataTarget`
    pub static ICORDEBUG_MUTABLE_DATA_TARGET: "ICorDebugMutableDataTarget" = 0xA1B8A756_3CB6_4CCB_979F_3DF999673A59 : ICORDEBUG_DATA_TARGET {
        WriteVirtual,
        SetThreadContext,
        ContinueStatusChange,
    }
}

declare_interface! {
    pub static ICORDEBUG_METADATA_LOCATOR: "ICorDebugMetaDataLocator" = 0x7cef8ba9_2ef7_42bf_973f_4171474f87d9 {
        GetMetaData,
    }
}

// ----------------------------------------------------------------------------
// SOS hosting interfaces (host.h, target.h, runtime.h, symbolservice.h)
// ----------------------------------------------------------------------------

declare_interface! {
    /// `IHost`: the root interface passed to `SOSInitializeByHost`
    pub static IHOST: "IHost" = 0xE0CD8534_A88B_40D7_91BA_1B4C925761E9 {
        GetHostType,
        GetService,
        GetCurrentTarget,
    }
}

declare_interface! {
    pub static ITARGET: "ITarget" = 0xB4640016_6CA0_468E_BA2C_1FFF28DE7B72 {
        GetOperatingSystem,
        GetService,
        GetTempDirectory,
        GetRuntime,
        Flush,
    }
}

declare_interface! {
    pub static IRUNTIME: "IRuntime" = 0xA5F152B9_BA78_4512_9228_5091A4CB7E35 {
        GetRuntimeConfiguration,
        GetModuleAddress,
        GetModuleSize,
        SetRuntimeDirectory,
        GetRuntimeDirectory,
        GetClrDataProcess,
        GetCorDebugInterface,
        GetEEVersion,
    }
}

declare_interface! {
    pub static ISYMBOL_SERVICE: "ISymbolService" = 0x7EE88D46_F8B3_4645_AD3E_01FE7D4F70F1 {
        IsSymbolStoreEnabled,
        InitializeSymbolStore,
        ParseSymbolPath,
        DisplaySymbolStore,
        DisableSymbolStore,
        LoadNativeSymbols,
        LoadNativeSymbolsFromIndex,
        LoadSymbolsForModule,
        Dispose,
        ResolveSequencePoint,
        GetLocalVariableName,
        GetLineByILOffset,
        GetExpressionValue,
        GetMetadataLocator,
        GetICorDebugMetadataLocator,
    }
}

// ----------------------------------------------------------------------------
// LLDB debugger services (lldbservices.h)
// ----------------------------------------------------------------------------

declare_interface! {
    /// `ILLDBServices`: the command interface every SOS export receives
    pub static ILLDB_SERVICES: "ILLDBServices" = 0x2E6C569A_9E14_4DA4_9DFC_CDB73A532566 {
        GetCoreClrDirectory,
        GetExpression,
        VirtualUnwind,
        SetExceptionCallback,
        ClearExceptionCallback,
        GetInterrupt,
        OutputVaList,
        GetDebuggeeType,
        GetPageSize,
        GetExecutingProcessorType,
        Execute,
        GetLastEventInformation,
        Disassemble,
        GetContextStackTrace,
        ReadVirtual,
        WriteVirtual,
        GetSymbolOptions,
        GetNameByOffset,
        GetNumberModules,
        GetModuleByIndex,
        GetModuleByModuleName,
        GetModuleByOffset,
        GetModuleNames,
        GetLineByOffset,
        GetSourceFileLineOffsets,
        FindSourceFile,
        GetCurrentProcessSystemId,
        GetCurrentThreadId,
        SetCurrentThreadId,
        GetCurrentThreadSystemId,
        GetThreadIdBySystemId,
        GetThreadContextBySystemId,
        GetValueByName,
        GetInstructionOffset,
        GetStackOffset,
        GetFrameOffset,
    }
}

declare_interface! {
    pub static ILLDB_SERVICES2: "ILLDBServices2" = 0x012F32F0_33BA_4E8E_BC01_037D382D8A5E {
        LoadNativeSymbols2,
        AddModuleSymbol,
        GetModuleInfo,
        GetModuleVersionInformation,
    }
}

// ----------------------------------------------------------------------------
// Interfaces requested from the DAC and DBI, never implemented here
// ----------------------------------------------------------------------------

/// `IXCLRDataProcess`, requested from `CLRDataCreateInstance`
pub const IID_IXCLR_DATA_PROCESS: Guid = Guid::from_u128(0x5c552ab6_fc09_4cb3_8e36_22fa03c798b7);

/// `ICorDebugProcess`, requested from `OpenVirtualProcess*`
pub const IID_ICORDEBUG_PROCESS: Guid = Guid::from_u128(0x3d6f5f64_7538_11d3_8d5b_00104b35e7ef);

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_slot_counts()
    {
        assert_eq!(ICLR_DATA_TARGET.slot_count(), 11);
        assert_eq!(ICLR_DATA_TARGET2.slot_count(), 13);
        assert_eq!(ICORDEBUG_MUTABLE_DATA_TARGET.slot_count(), 6);
        assert_eq!(IRUNTIME.slot_count(), 8);
        assert_eq!(ISYMBOL_SERVICE.slot_count(), 15);
        assert_eq!(ILLDB_SERVICES.slot_count(), 36);
        assert_eq!(ILLDB_SERVICES2.slot_count(), 4);
    }

    #[test]
    fn test_derived_interfaces_repeat_base_slots()
    {
        assert_eq!(ICLR_DATA_TARGET2.slot_index("ReadVirtual"), Some(3));
        assert_eq!(ICLR_DATA_TARGET2.slot_index("AllocVirtual"), Some(11));
        assert_eq!(ICORDEBUG_MUTABLE_DATA_TARGET.slot_index("GetPlatform"), Some(0));
        assert_eq!(ICORDEBUG_MUTABLE_DATA_TARGET.slot_index("WriteVirtual"), Some(3));
        assert!(ICORDEBUG_MUTABLE_DATA_TARGET.derives_from(&ICORDEBUG_DATA_TARGET));
    }

    #[test]
    fn test_known_iids()
    {
        assert_eq!(IHOST.iid.to_string(), "E0CD8534-A88B-40D7-91BA-1B4C925761E9");
        assert_eq!(IID_ICORDEBUG_PROCESS.to_string(), "3D6F5F64-7538-11D3-8D5B-00104B35E7EF");
    }
}
