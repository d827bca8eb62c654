//! Current thread and runtime selection for one session.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::{ClrRuntime, ContextService, ModuleService, Runtime};
use crate::types::{OperatingSystem, ThreadId};

/// Default [`ContextService`]
///
/// The runtime is discovered from the module list on first use and kept
/// until [`HostContext::flush`].
pub struct HostContext
{
    modules: Arc<dyn ModuleService>,
    operating_system: OperatingSystem,
    current_thread: Mutex<Option<ThreadId>>,
    runtime: Mutex<Option<Arc<dyn Runtime>>>,
}

impl HostContext
{
    pub fn new(modules: Arc<dyn ModuleService>, operating_system: OperatingSystem) -> Self
    {
        Self {
            modules,
            operating_system,
            current_thread: Mutex::new(None),
            runtime: Mutex::new(None),
        }
    }

    /// Forget the discovered runtime
    pub fn flush(&self)
    {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl ContextService for HostContext
{
    fn current_thread(&self) -> Option<ThreadId>
    {
        *self.current_thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current_thread(&self, thread_id: Option<ThreadId>)
    {
        debug!(thread = ?thread_id, "current thread changed");
        *self.current_thread.lock().unwrap_or_else(PoisonError::into_inner) = thread_id;
    }

    fn current_runtime(&self) -> Option<Arc<dyn Runtime>>
    {
        let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if runtime.is_none() {
            let modules = self.modules.enumerate_modules();
            *runtime = ClrRuntime::locate(&modules, self.operating_system).map(|found| Arc::new(found) as Arc<dyn Runtime>);
        }
        runtime.clone()
    }
}

impl std::fmt::Debug for HostContext
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("HostContext")
            .field("operating_system", &self.operating_system)
            .field("current_thread", &self.current_thread())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::{Address, ModuleInfo};

    struct Modules(Vec<ModuleInfo>);

    impl ModuleService for Modules
    {
        fn enumerate_modules(&self) -> Vec<ModuleInfo>
        {
            self.0.clone()
        }
    }

    #[test]
    fn test_runtime_cached_until_flush()
    {
        let modules = Arc::new(Modules(vec![ModuleInfo::new(
            0,
            Address::new(0x7f00_0000_0000),
            0x80_0000,
            "/usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0/libcoreclr.so",
        )]));
        let context = HostContext::new(modules, OperatingSystem::Linux);

        let first = context.current_runtime();
        let second = context.current_runtime();
        assert!(first.is_some());
        assert!(matches!((&first, &second), (Some(a), Some(b)) if Arc::ptr_eq(a, b)));

        context.flush();
        let third = context.current_runtime();
        assert!(matches!((&first, &third), (Some(a), Some(b)) if !Arc::ptr_eq(a, b)));
    }

    #[test]
    fn test_current_thread_roundtrip()
    {
        let context = HostContext::new(Arc::new(Modules(Vec::new())), OperatingSystem::Windows);
        assert_eq!(context.current_thread(), None);
        context.set_current_thread(Some(ThreadId(0x1f40)));
        assert_eq!(context.current_thread(), Some(ThreadId(0x1f40)));
        assert!(context.current_runtime().is_none());
    }
}
