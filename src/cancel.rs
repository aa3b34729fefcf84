//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A polled cancellation flag.
///
/// Clones share the same underlying flag. Cancelling is idempotent and never
/// interrupts running work: owners check [`CancelFlag::is_cancelled`] at their
/// own suspension points.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns `true` if this call was the one that set it.
    pub fn cancel(&self) -> bool {
        !self.inner.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}
