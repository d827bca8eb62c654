//! Common module for library exports

pub use crate::com::{ComClass, ComObject, ComObjectBuilder, Guid, HResult};
pub use crate::config::HostConfig;
pub use crate::error::{HostError, Result};
pub use crate::host::SosHost;
pub use crate::hosting::{HostWrapper, LldbServices, RuntimeWrapper, SymbolServiceWrapper, TargetWrapper};
pub use crate::platform::{AttachMode, LiveTarget, ProcessReader, ThreadControl, ThreadSuspender};
pub use crate::services::{
    ConsoleService, ContextService, MemoryService, ModuleService, Services, SymbolService, Target, ThreadService,
};
pub use crate::types::{Address, Architecture, ModuleInfo, OperatingSystem, ProcessId, ThreadId, ThreadInfo};
