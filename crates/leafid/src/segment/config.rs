use core::time::Duration;

/// Tuning knobs for a [`SegmentAllocator`](crate::segment::SegmentAllocator).
///
/// The defaults match a production deployment: a refill every 15 minutes is
/// the target, steps never grow beyond one million ids, and the tag set is
/// re-read from the store every minute.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Upper bound for dynamically grown steps.
    pub max_step: i64,

    /// Desired time between two refills of the same tag. Refilling faster
    /// doubles the step; refilling slower than twice this halves it.
    pub segment_duration: Duration,

    /// Period of the tag resync task started by `init`.
    pub resync_interval: Duration,

    /// Fraction of the step below which the remaining capacity of the active
    /// segment triggers a background refill. The threshold is rounded up and
    /// never below one, so an exhausted segment always claims a refill.
    pub prefetch_ratio: f64,

    /// How long a request that found its segment exhausted waits for an
    /// in-flight refill before giving up with `SegmentsExhausted`.
    pub refill_wait: Duration,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_step: 1_000_000,
            segment_duration: Duration::from_secs(15 * 60),
            resync_interval: Duration::from_secs(60),
            prefetch_ratio: 0.1,
            refill_wait: Duration::from_millis(10),
        }
    }
}

impl SegmentConfig {
    pub(crate) fn segment_duration_ms(&self) -> i64 {
        i64::try_from(self.segment_duration.as_millis()).unwrap_or(i64::MAX)
    }

    /// Remaining-capacity threshold for a segment of `step` ids; a refill is
    /// claimed once strictly fewer ids remain.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub(crate) fn prefetch_threshold(&self, step: i64) -> i64 {
        ((step as f64 * self.prefetch_ratio).ceil() as i64).max(1)
    }
}
