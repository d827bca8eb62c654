//! Flush notifications.
//!
//! Adapters that cache handles derived from target state (the DAC's
//! `IXCLRDataProcess`, the DBI's `ICorDebugProcess`, the current runtime)
//! subscribe here and drop their caches when the target flushes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Subscription returned by [`FlushEvent::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlushToken(u64);

/// A list of handlers run on every flush
#[derive(Default)]
pub struct FlushEvent
{
    next_token: AtomicU64,
    handlers: Mutex<Vec<(FlushToken, Handler)>>,
}

impl FlushEvent
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Run `handler` on every future flush until unregistered
    pub fn register<F>(&self, handler: F) -> FlushToken
    where
        F: Fn() + Send + Sync + 'static,
    {
        let token = FlushToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token, Arc::new(handler)));
        token
    }

    /// Remove a subscription, returning whether it was still registered
    pub fn unregister(&self, token: FlushToken) -> bool
    {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != token);
        handlers.len() != before
    }

    /// Run every handler
    ///
    /// Handlers run outside the lock, so one may unregister itself or
    /// others while the event fires.
    pub fn fire(&self)
    {
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        debug!(handlers = handlers.len(), "flushing target state");
        for handler in handlers {
            handler();
        }
    }

    pub fn len(&self) -> usize
    {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}

impl std::fmt::Debug for FlushEvent
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("FlushEvent").field("handlers", &self.len()).finish()
    }
}
