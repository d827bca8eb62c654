//! Opaque tokens for in-process objects handed to native code.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, PoisonError};

use tracing::{trace, warn};

/// Maps non-zero tokens to owned values
///
/// Native code only ever sees the token, disguised as a pointer. Disposing a
/// token twice, or one that was never issued, is logged and ignored.
pub struct HandleTable<T>
{
    inner: Mutex<Table<T>>,
}

struct Table<T>
{
    next: usize,
    entries: HashMap<usize, T>,
}

impl<T> HandleTable<T>
{
    pub fn new() -> Self
    {
        Self {
            inner: Mutex::new(Table {
                next: 1,
                entries: HashMap::new(),
            }),
        }
    }

    /// Store `value`, returning its token
    pub fn insert(&self, value: T) -> *mut c_void
    {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let token = table.next;
        table.next = table.next.checked_add(1).unwrap_or(1);
        table.entries.insert(token, value);
        trace!(token, "handle issued");
        token as *mut c_void
    }

    /// Run `f` on the value behind `handle`
    pub fn with<R>(&self, handle: *mut c_void, f: impl FnOnce(&T) -> R) -> Option<R>
    {
        let table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table.entries.get(&(handle as usize)).map(f)
    }

    /// Take the value behind `handle` out of the table
    pub fn remove(&self, handle: *mut c_void) -> Option<T>
    {
        let removed = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(&(handle as usize));
        if removed.is_none() {
            warn!(token = handle as usize, "dispose of unknown or already disposed handle");
        }
        removed
    }

    pub fn len(&self) -> usize
    {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Drop every value
    pub fn clear(&self)
    {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).entries.clear();
    }
}

impl<T> Default for HandleTable<T>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<T> std::fmt::Debug for HandleTable<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("HandleTable").field("len", &self.len()).finish()
    }
}
