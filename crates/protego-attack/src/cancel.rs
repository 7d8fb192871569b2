//! Cooperative cancellation for long attack loops.

use protego_core::{Result, ScanError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancel flag plus an optional wall-clock deadline.
///
/// Clones share the flag, so cancelling any clone cancels them all. Deadlines
/// are per clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same flag, with a deadline `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once the flag is set or the deadline has passed.
    pub fn check(&self, completed: usize) -> Result<()> {
        if self.is_cancelled() {
            return Err(ScanError::Cancelled { completed });
        }
        Ok(())
    }
}
