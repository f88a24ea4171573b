use rand::{Rng, rng};

/// A trait for random sources used to jitter the Snowflake sequence.
///
/// This abstraction allows you to plug in a real random source or a mocked
/// random source in tests.
///
/// # Example
/// ```
/// use leafid::RandSource;
///
/// struct FixedRand;
/// impl RandSource for FixedRand {
///     fn below(&self, _bound: i64) -> i64 {
///         7
///     }
/// }
///
/// let rng = FixedRand;
/// assert_eq!(rng.below(100), 7);
/// ```
pub trait RandSource: Send + Sync {
    /// Returns a random integer in `[0, bound)`.
    fn below(&self, bound: i64) -> i64;
}

/// A `RandSource` that uses the thread-local RNG (`rand::rng()`).
///
/// Each OS thread has its own RNG instance, so calls from multiple threads are
/// contention-free. This type does **not** store the RNG itself; it simply
/// accesses the thread-local generator on each call, which keeps it `Send`
/// and `Sync`.
#[derive(Default, Clone, Copy, Debug)]
pub struct ThreadRandom;

impl RandSource for ThreadRandom {
    fn below(&self, bound: i64) -> i64 {
        if bound <= 1 {
            return 0;
        }
        rng().random_range(0..bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_random_stays_in_bounds() {
        for _ in 0..1_000 {
            let v = ThreadRandom.below(100);
            assert!((0..100).contains(&v));
        }
        assert_eq!(ThreadRandom.below(1), 0);
        assert_eq!(ThreadRandom.below(0), 0);
    }
}
