//! Wall-clock abstraction.
//!
//! Retention windows and pending-candidate ages are measured against a [Clock] so that tests can
//! advance time deterministically with a [ManualClock].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Extension trait to add methods to `std::time::SystemTime`
pub trait SystemTimeExt {
    /// Returns the duration since the Unix epoch.
    ///
    /// Panics if the system time is before the Unix epoch.
    fn epoch(&self) -> Duration;

    /// Returns the number of whole seconds since the Unix epoch.
    fn epoch_secs(&self) -> u64 {
        self.epoch().as_secs()
    }
}

impl SystemTimeExt for SystemTime {
    fn epoch(&self) -> Duration {
        self.duration_since(UNIX_EPOCH)
            .expect("failed to calculate time since epoch")
    }
}

/// A source of wall-clock time.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Returns the current time.
    fn current(&self) -> SystemTime;
}

/// [Clock] backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// [Clock] that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at `start` since the Unix epoch.
    pub fn new(start: Duration) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start.as_millis() as u64)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn current(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}
