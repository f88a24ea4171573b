use serde::{Deserialize, Serialize};

/// Outcome marker of an [`IdResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Exception,
}

/// Numeric codes carried in [`IdResult::id`] when the status is
/// [`Status::Exception`].
///
/// All codes are negative so that they can never be confused with an issued
/// id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ExceptionCode {
    /// The tag's buffer has not been loaded from the store yet. Retryable.
    InitNotReady = -1,
    /// The tag is unknown to the allocator.
    KeyNotFound = -2,
    /// Both the active and the standby segment are unusable. Retry after a
    /// backoff.
    SegmentsExhausted = -3,
    /// The local clock regressed beyond tolerance while generating a
    /// Snowflake id. Not retried internally.
    ClockMovedBackward = -4,
}

impl ExceptionCode {
    pub const fn code(self) -> i64 {
        self as i64
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(Self::InitNotReady),
            -2 => Some(Self::KeyNotFound),
            -3 => Some(Self::SegmentsExhausted),
            -4 => Some(Self::ClockMovedBackward),
            _ => None,
        }
    }
}

/// Represents the result of a single id request.
///
/// This is the uniform value returned by every [`IdGen`](crate::IdGen):
///
/// - [`Status::Success`]: `id` is a freshly issued, non-negative id.
/// - [`Status::Exception`]: `id` is an [`ExceptionCode`].
///
/// Callers distinguish the two by `status`, never by inspecting `id` alone.
///
/// # Example
///
/// ```
/// use leafid::{ExceptionCode, IdResult};
///
/// let ok = IdResult::success(42);
/// assert_eq!(ok.into_result(), Ok(42));
///
/// let err = IdResult::exception(ExceptionCode::KeyNotFound);
/// assert_eq!(err.id, -2);
/// assert_eq!(err.into_result(), Err(ExceptionCode::KeyNotFound));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdResult {
    pub id: i64,
    pub status: Status,
}

impl IdResult {
    pub const fn success(id: i64) -> Self {
        Self {
            id,
            status: Status::Success,
        }
    }

    pub const fn exception(code: ExceptionCode) -> Self {
        Self {
            id: code.code(),
            status: Status::Exception,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }

    /// Returns the exception code, if this result is an exception.
    pub const fn exception_code(&self) -> Option<ExceptionCode> {
        match self.status {
            Status::Success => None,
            Status::Exception => ExceptionCode::from_code(self.id),
        }
    }

    /// Converts into a standard [`Result`], mapping unknown exception codes
    /// to [`ExceptionCode::InitNotReady`].
    pub const fn into_result(self) -> Result<i64, ExceptionCode> {
        match self.status {
            Status::Success => Ok(self.id),
            Status::Exception => match ExceptionCode::from_code(self.id) {
                Some(code) => Err(code),
                None => Err(ExceptionCode::InitNotReady),
            },
        }
    }
}

/// Represents one attempt of the Snowflake generator to produce an id.
///
/// - [`IdGenStatus::Ready`] indicates a new id was generated.
/// - [`IdGenStatus::Pending`] means the generator cannot produce an id
///   before `yield_for` milliseconds pass: the sequence of the current
///   millisecond is spent, or the clock stepped back by a tolerable amount.
///
/// This allows non-blocking generation loops and clean backoff strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    /// A unique id was generated and is ready to use.
    Ready { id: i64 },
    /// Retry after waiting this many milliseconds.
    Pending { yield_for: i64 },
}
