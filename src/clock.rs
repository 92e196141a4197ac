use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time, expressed as seconds since the Unix epoch.
///
/// Threaded through token issuance, ping scheduling and mock-server timestamping so
/// that tests can inject a fixed or manually-advancing clock instead of calling
/// `SystemTime::now()` directly.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock controlled by the test, starting at `epoch` and advanced explicitly.
    #[derive(Debug)]
    pub struct FixedClock(AtomicU64);

    impl FixedClock {
        pub fn new(epoch: u64) -> Self {
            Self(AtomicU64::new(epoch))
        }

        pub fn advance(&self, seconds: u64) {
            self.0.fetch_add(seconds, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
