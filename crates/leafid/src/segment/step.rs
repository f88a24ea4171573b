use crate::segment::SegmentConfig;

/// Computes the step of the next refill from the time elapsed since the
/// previous one.
///
/// - Faster than `segment_duration`: double, capped at `max_step`.
/// - Between one and two `segment_duration`s: unchanged.
/// - Slower than two `segment_duration`s: halve, floored at `min_step`.
///
/// # Example
///
/// ```
/// use leafid::segment::{SegmentConfig, next_step};
///
/// let config = SegmentConfig::default();
/// assert_eq!(next_step(100, 100, 100, &config), 200);
/// assert_eq!(next_step(200, 100, 2 * 900_000, &config), 100);
/// ```
pub fn next_step(current: i64, min_step: i64, elapsed_ms: i64, config: &SegmentConfig) -> i64 {
    let window = config.segment_duration_ms();
    if elapsed_ms < window {
        current.saturating_mul(2).min(config.max_step)
    } else if elapsed_ms < window.saturating_mul(2) {
        current
    } else {
        (current / 2).max(min_step)
    }
}
