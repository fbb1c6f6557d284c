use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic time source — the sole seam for determinism in tests.
///
/// Every limiter component reads time through this trait instead of calling
/// `Instant::now()` directly, so a test can hold time still or fast-forward
/// it without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real wall-clock time, used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually-advanced clock for tests.
///
/// `Instant` has no public constructor other than `now()`, so the test clock
/// anchors itself at creation time and only ever moves forward by explicit
/// `advance()` calls.
#[derive(Debug, Clone)]
pub struct TestClock {
    inner: Arc<Mutex<Instant>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.inner.lock() += by;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.inner.lock()
    }
}
