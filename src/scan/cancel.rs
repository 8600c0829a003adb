use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::IoError;

/// Cooperative cancellation flag shared between a scan and its owner.
///
/// Clones share the same flag. The scanner checks it before every source
/// read, seek and search; once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fail with [`IoError::Cancelled`] if cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<(), IoError> {
        if self.is_cancelled() {
            Err(IoError::Cancelled)
        } else {
            Ok(())
        }
    }
}
