//! Cooperative cancellation (§5, §9).
//!
//! A [`CancellationToken`] is checked at method entry and before any step
//! that might block — growing the WAL file, walking another chunk of the
//! recovery log, touching another block in a multi-block read or write.
//! It is never honored once an append has started writing entry bytes:
//! cancellation races with success are resolved toward success, so I1 (the
//! header update) always completes for an append already underway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CacheError, Result};

/// A cheaply cloneable, `Send + Sync` cancellation flag. Cloning shares the
/// same underlying flag — cancelling any clone cancels them all.
#[derive(Clone, Default, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(CacheError::Cancelled)` if cancellation has been
    /// requested, `Ok(())` otherwise.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CacheError::Cancelled)
        } else {
            Ok(())
        }
    }
}
