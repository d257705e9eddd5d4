// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Clock capability, parameterized at every boundary that used to call
//! `SystemTime::now()`/`Instant::now()` directly so tests can run rotation
//! and continuity sequences without real wall-clock delay.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A source of the current time and of suspension, injected into every
/// subsystem that needs to reason about expiry or schedule a delay.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;

    /// Suspend the caller for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Production clock backed by [`tokio::time::sleep`] and [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// A deterministic clock for tests: `now()` is an explicit, externally
/// advanced instant; `sleep` resolves immediately so continuity/rotation
/// sequences run without wall-clock delay.
///
/// Tests that need to observe scheduling order (rather than just final
/// state) should advance the clock themselves before asserting.
#[derive(Debug, Clone)]
pub struct ManualClock {
    epoch: SystemTime,
    offset_secs: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a manual clock starting at `epoch`.
    #[must_use]
    pub fn new(epoch: SystemTime) -> Self {
        Self {
            epoch,
            offset_secs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.offset_secs
            .fetch_add(duration.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.epoch + Duration::from_secs(self.offset_secs.load(Ordering::SeqCst))
    }

    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(std::future::ready(()))
    }
}
