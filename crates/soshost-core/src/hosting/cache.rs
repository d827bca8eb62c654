//! Lazily created interface pointers that are dropped on flush.

use std::ffi::c_void;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::com::{ComRef, HResult};

/// One lazily created native interface
///
/// States: absent → (first successful creation) → present → (flush) →
/// absent. The check and the creation happen under one lock, so two
/// callers racing on an absent cache create the object once.
pub struct CachedInterface
{
    name: &'static str,
    slot: Mutex<Option<ComRef>>,
}

impl CachedInterface
{
    pub const fn new(name: &'static str) -> Self
    {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    /// The cached pointer, creating it with `create` when absent
    ///
    /// The returned pointer is borrowed from the cache; no reference is
    /// added for the caller.
    ///
    /// ## Errors
    ///
    /// Whatever `create` returns; the cache stays absent.
    pub fn get_or_create(&self, create: impl FnOnce() -> Result<ComRef, HResult>) -> Result<*mut c_void, HResult>
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.as_raw());
        }
        let created = create()?;
        debug!(interface = self.name, "created cached interface");
        let raw = created.as_raw();
        *slot = Some(created);
        Ok(raw)
    }

    pub fn is_present(&self) -> bool
    {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Release the cached reference, if any
    pub fn clear(&self)
    {
        let released = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if released.is_some() {
            debug!(interface = self.name, "released cached interface");
        }
    }
}

impl std::fmt::Debug for CachedInterface
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("CachedInterface")
            .field("name", &self.name)
            .field("present", &self.is_present())
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::com::{ComClass, ComObjectBuilder, IUNKNOWN};

    struct Dummy(Arc<AtomicUsize>);

    impl ComClass for Dummy
    {
        fn destroy(&mut self)
        {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_created_once_until_cleared()
    {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let object = ComObjectBuilder::new(Dummy(destroyed.clone())).finish();
        let cache = CachedInterface::new("IDummy");
        let mut calls = 0;

        let first = cache.get_or_create(|| {
            calls += 1;
            object.query_interface(&IUNKNOWN.iid).map_err(|_| HResult::E_NOINTERFACE)
        });
        let second = cache.get_or_create(|| {
            calls += 1;
            Err(HResult::E_FAIL)
        });
        assert_eq!(first, second);
        assert_eq!(calls, 1);
        assert_eq!(object.ref_count(), 2);

        cache.clear();
        assert!(!cache.is_present());
        assert_eq!(object.ref_count(), 1);
        drop(object);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_creation_stays_absent()
    {
        let cache = CachedInterface::new("IDummy");
        assert_eq!(cache.get_or_create(|| Err(HResult::E_NOINTERFACE)), Err(HResult::E_NOINTERFACE));
        assert!(!cache.is_present());
    }
}
