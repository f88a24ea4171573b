use core::time::Duration;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Twitter epoch: Thursday, November 4, 2010 1:42:54.657 UTC
///
/// The default zero point of the Snowflake timestamp field.
pub const TWITTER_EPOCH: Duration = Duration::from_millis(1_288_834_974_657);

/// Custom epoch: Wednesday, January 1, 2025 00:00:00 UTC
pub const CUSTOM_EPOCH: Duration = Duration::from_millis(1_735_689_600_000);

/// A trait for time sources that return a wall-clock timestamp.
///
/// This abstraction allows you to plug in the real system clock or a mocked
/// time source in tests. Timestamps are **milliseconds since the Unix
/// epoch**. Implementations are allowed to go backwards (the system clock
/// can be adjusted), and the Snowflake generator relies on observing that.
///
/// # Example
///
/// ```
/// use leafid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> i64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1234);
/// ```
pub trait TimeSource: Send + Sync {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> i64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> i64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> i64 {
        (**self).current_millis()
    }
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> i64 {
        // A clock set before 1970 reads as zero; the generators treat that as
        // a regression like any other.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::TimeSource;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A clock that only moves when told to.
    #[derive(Debug, Default)]
    pub(crate) struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        pub(crate) const fn new(millis: i64) -> Self {
            Self {
                millis: AtomicI64::new(millis),
            }
        }

        pub(crate) fn set(&self, millis: i64) {
            self.millis.store(millis, Ordering::SeqCst);
        }

        pub(crate) fn advance(&self, millis: i64) {
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl TimeSource for ManualClock {
        fn current_millis(&self) -> i64 {
            self.millis.load(Ordering::SeqCst)
        }
    }

    /// A clock that advances one millisecond every `reads_per_milli` reads.
    ///
    /// Lets busy-wait loops terminate deterministically.
    #[derive(Debug)]
    pub(crate) struct SteppingClock {
        base: i64,
        reads: AtomicI64,
        reads_per_milli: i64,
    }

    impl SteppingClock {
        pub(crate) const fn new(base: i64, reads_per_milli: i64) -> Self {
            Self {
                base,
                reads: AtomicI64::new(0),
                reads_per_milli,
            }
        }
    }

    impl TimeSource for SteppingClock {
        fn current_millis(&self) -> i64 {
            let reads = self.reads.fetch_add(1, Ordering::SeqCst);
            self.base + reads / self.reads_per_milli
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_epochs() {
        let now = SystemClock.current_millis();
        assert!(now > TWITTER_EPOCH.as_millis() as i64);
        assert!(now > CUSTOM_EPOCH.as_millis() as i64);
    }
}
