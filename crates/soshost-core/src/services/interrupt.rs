//! Cooperative cancellation of long-running SOS commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "interrupt requested" flag
///
/// The CLI sets it from its Ctrl+C handler; `ILLDBServices::GetInterrupt`
/// polls it, and SOS stops the current command when it reads `S_OK`.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken(Arc<AtomicBool>);

impl InterruptToken
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn request(&self)
    {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Reset before the next command runs
    pub fn clear(&self)
    {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool
    {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_clones_share_the_flag()
    {
        let token = InterruptToken::new();
        let handler_copy = token.clone();
        assert!(!token.is_requested());
        handler_copy.request();
        assert!(token.is_requested());
        token.clear();
        assert!(!handler_copy.is_requested());
    }
}
