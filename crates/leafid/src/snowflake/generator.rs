use core::time::Duration;

use parking_lot::Mutex;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, ExceptionCode, IdGen, IdGenStatus, IdResult, RandSource, Result, SystemClock,
    TWITTER_EPOCH, ThreadRandom, TimeSource,
    snowflake::{DecodedSnowflake, MAX_WORKER_ID, SEQUENCE_MASK, compose, decode},
};

/// Largest backward clock step, in milliseconds, that the generator waits out
/// instead of failing.
pub const MAX_BACKWARD_MS: i64 = 5;

/// Upper bound (exclusive) of the random sequence start of each millisecond.
pub const SEQUENCE_JITTER: i64 = 100;

#[derive(Debug, Clone)]
pub struct SnowflakeConfig {
    /// Zero point of the timestamp field. Must lie in the past.
    pub epoch: Duration,
    /// Worker id in `[0, MAX_WORKER_ID]`, either static or leased from a
    /// [`WorkerIdCoordinator`](crate::coordinator::WorkerIdCoordinator).
    pub worker_id: i64,
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            epoch: TWITTER_EPOCH,
            worker_id: 0,
        }
    }
}

#[derive(Debug)]
struct State {
    last_timestamp: i64,
    sequence: i64,
}

/// One generation attempt. The two waits are kept apart: only the read that
/// follows a backward-clock wait may fail on a small regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Ready(i64),
    /// The clock is behind the last issued timestamp by a tolerated amount.
    Behind { yield_for: i64 },
    /// The sequence of the current millisecond is spent.
    Spent,
}

impl From<Attempt> for IdGenStatus {
    fn from(attempt: Attempt) -> Self {
        match attempt {
            Attempt::Ready(id) => Self::Ready { id },
            Attempt::Behind { yield_for } => Self::Pending { yield_for },
            Attempt::Spent => Self::Pending { yield_for: 1 },
        }
    }
}

/// A lock-based Snowflake id generator.
///
/// The `(last_timestamp, sequence)` pair sits behind a [`Mutex`]; every id is
/// composed from the current millisecond, the worker id and the sequence.
/// Each new millisecond starts the sequence at a small random offset so that
/// ids from lightly loaded workers do not all end in zero.
///
/// ## Clock regressions
///
/// A backward step of at most [`MAX_BACKWARD_MS`] yields
/// [`IdGenStatus::Pending`] for twice the offset; if the clock is still
/// behind after that wait the request fails with
/// [`Error::ClockMovedBackward`]. Larger regressions fail immediately.
///
/// # Example
///
/// ```
/// use leafid::snowflake::{SnowflakeConfig, SnowflakeGenerator};
///
/// let generator = SnowflakeGenerator::new(SnowflakeConfig {
///     worker_id: 7,
///     ..SnowflakeConfig::default()
/// })
/// .unwrap();
///
/// let a = generator.next_id().unwrap();
/// let b = generator.next_id().unwrap();
/// assert!(a < b);
/// assert_eq!(generator.decode(a).worker_id, 7);
/// ```
pub struct SnowflakeGenerator<T = SystemClock, R = ThreadRandom>
where
    T: TimeSource,
    R: RandSource,
{
    epoch_ms: i64,
    worker_id: i64,
    state: Mutex<State>,
    time: T,
    rand: R,
}

impl SnowflakeGenerator<SystemClock, ThreadRandom> {
    /// Creates a generator on the system clock.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerIdOutOfRange`] if the worker id does not fit in 10
    ///   bits.
    /// - [`Error::EpochInFuture`] if the epoch is not before now.
    pub fn new(config: SnowflakeConfig) -> Result<Self> {
        Self::with_sources(config, SystemClock, ThreadRandom)
    }
}

impl<T, R> SnowflakeGenerator<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    /// Creates a generator with explicit time and random sources.
    ///
    /// # Errors
    ///
    /// Same as [`SnowflakeGenerator::new`].
    pub fn with_sources(config: SnowflakeConfig, time: T, rand: R) -> Result<Self> {
        if !(0..=MAX_WORKER_ID).contains(&config.worker_id) {
            return Err(Error::WorkerIdOutOfRange {
                worker_id: config.worker_id,
                max: MAX_WORKER_ID,
            });
        }
        let epoch_ms = i64::try_from(config.epoch.as_millis()).unwrap_or(i64::MAX);
        let now_ms = time.current_millis();
        if epoch_ms >= now_ms {
            return Err(Error::EpochInFuture { epoch_ms, now_ms });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(worker_id = config.worker_id, epoch_ms, "snowflake generator ready");
        Ok(Self {
            epoch_ms,
            worker_id: config.worker_id,
            state: Mutex::new(State {
                last_timestamp: 0,
                sequence: 0,
            }),
            time,
            rand,
        })
    }

    pub const fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub const fn epoch_ms(&self) -> i64 {
        self.epoch_ms
    }

    /// Splits an id produced with this generator's epoch.
    pub const fn decode(&self, id: i64) -> DecodedSnowflake {
        decode(id, self.epoch_ms)
    }

    /// Attempts to generate the next id without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClockMovedBackward`] if the clock regressed by more
    /// than [`MAX_BACKWARD_MS`].
    ///
    /// # Example
    ///
    /// ```
    /// use leafid::{IdGenStatus, snowflake::{SnowflakeConfig, SnowflakeGenerator}};
    ///
    /// let generator = SnowflakeGenerator::new(SnowflakeConfig::default()).unwrap();
    /// let id = loop {
    ///     match generator.try_next_id().unwrap() {
    ///         IdGenStatus::Ready { id } => break id,
    ///         IdGenStatus::Pending { yield_for } => {
    ///             std::thread::sleep(core::time::Duration::from_millis(yield_for as u64));
    ///         }
    ///     }
    /// };
    /// assert!(id > 0);
    /// ```
    pub fn try_next_id(&self) -> Result<IdGenStatus> {
        self.poll(false).map(IdGenStatus::from)
    }

    /// Generates the next id, sleeping the thread through short waits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClockMovedBackward`] if the clock regressed beyond
    /// tolerance, or is still behind after the tolerated wait.
    pub fn next_id(&self) -> Result<i64> {
        let mut after_backward_wait = false;
        loop {
            let yield_for = match self.poll(after_backward_wait)? {
                Attempt::Ready(id) => return Ok(id),
                Attempt::Behind { yield_for } => {
                    after_backward_wait = true;
                    yield_for
                }
                Attempt::Spent => {
                    after_backward_wait = false;
                    1
                }
            };
            std::thread::sleep(millis(yield_for));
        }
    }

    /// Generates the next id, sleeping the task through short waits.
    ///
    /// # Errors
    ///
    /// Same as [`next_id`](Self::next_id).
    pub async fn next_id_async(&self) -> Result<i64> {
        let mut after_backward_wait = false;
        loop {
            let yield_for = match self.poll(after_backward_wait)? {
                Attempt::Ready(id) => return Ok(id),
                Attempt::Behind { yield_for } => {
                    after_backward_wait = true;
                    yield_for
                }
                Attempt::Spent => {
                    after_backward_wait = false;
                    1
                }
            };
            tokio::time::sleep(millis(yield_for)).await;
        }
    }

    /// One generation attempt. `after_backward_wait` is set once the caller has
    /// slept through a backward clock; a regression seen then is fatal.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    fn poll(&self, after_backward_wait: bool) -> Result<Attempt> {
        let mut state = self.state.lock();
        // Read under the lock so a reading never predates another thread's
        // issued timestamp.
        let now = self.time.current_millis();

        if now < state.last_timestamp {
            let offset_ms = state.last_timestamp - now;
            return if offset_ms <= MAX_BACKWARD_MS && !after_backward_wait {
                Ok(Attempt::Behind {
                    yield_for: offset_ms * 2,
                })
            } else {
                Self::cold_clock_backward(offset_ms)
            };
        }

        if now == state.last_timestamp {
            let sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if sequence == 0 {
                // The next millisecond restarts at a fresh jitter.
                return Ok(Attempt::Spent);
            }
            state.sequence = sequence;
        } else {
            state.sequence = self.rand.below(SEQUENCE_JITTER);
            state.last_timestamp = now;
        }

        Ok(Attempt::Ready(compose(
            now - self.epoch_ms,
            self.worker_id,
            state.sequence,
        )))
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_backward(offset_ms: i64) -> Result<Attempt> {
        #[cfg(feature = "tracing")]
        tracing::warn!(offset_ms, "clock moved backwards");
        Err(Error::ClockMovedBackward { offset_ms })
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

impl<T, R> IdGen for SnowflakeGenerator<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    async fn init(&self) -> bool {
        true
    }

    /// The tag is ignored: one sequence serves every caller.
    async fn get(&self, _tag: &str) -> IdResult {
        match self.next_id_async().await {
            Ok(id) => IdResult::success(id),
            Err(_) => IdResult::exception(ExceptionCode::ClockMovedBackward),
        }
    }
}
