use std::sync::Arc;
use std::time::{Duration, Instant};

use portable_atomic::{AtomicBool, Ordering};

/// Longest a cancellable sleep goes without re-checking its token.
pub const CANCEL_GRANULARITY: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared between threads.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` in slices of at most [`CANCEL_GRANULARITY`].
    ///
    /// Returns `false` if the token was cancelled before the time was up.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            std::thread::sleep(left.min(CANCEL_GRANULARITY));
        }
    }
}
