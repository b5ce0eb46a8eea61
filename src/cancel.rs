//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ImgforgeError, Result};

/// A shared flag that sibling build units poll between steps.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every unit sharing this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with [`ImgforgeError::Cancelled`] naming what would have run next.
    pub fn check(&self, before: impl std::fmt::Display) -> Result<()> {
        if self.is_cancelled() {
            return Err(ImgforgeError::Cancelled(before.to_string()));
        }
        Ok(())
    }
}
