//! Infrastructure errors raised by the allocation store, the coordination
//! backend and the generators' startup checks.
//!
//! These never reach an id-issuance caller directly. Request paths report
//! failures as an [`IdResult`](crate::IdResult) carrying an
//! [`ExceptionCode`](crate::ExceptionCode); background refill and heartbeat
//! failures are logged and absorbed. Startup failures (worker id out of
//! range, epoch in the future, coordinator unreachable without a local
//! fallback) are fatal and surface as [`Error`].

/// Result alias defaulting to the crate [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that `leafid` can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The persistent allocation store could not be reached or failed the
    /// operation.
    #[error("allocation store unavailable: {0}")]
    StoreUnavailable(String),

    /// The tag has no (live) row in the allocation store.
    #[error("no allocation for tag `{0}`")]
    NotFound(String),

    /// The store returned a row that cannot back a segment.
    #[error("invalid allocation for tag `{tag}`: {reason}")]
    InvalidAllocation { tag: String, reason: String },

    /// The coordination backend could not be reached.
    #[error("coordination backend unavailable: {0}")]
    CoordinatorUnavailable(String),

    /// The requested coordination node does not exist.
    #[error("no node at `{0}`")]
    NoNode(String),

    /// A node already exists at the path being created.
    #[error("node already exists at `{0}`")]
    NodeExists(String),

    /// Conditional update rejected because the node changed underneath us.
    #[error("version mismatch at `{path}`: expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    /// A child of the forever path does not follow `<ip:port>-<worker id>`.
    #[error("invalid node name `{0}`")]
    InvalidNodeName(String),

    /// A node payload could not be encoded or decoded.
    #[error("invalid node payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The local worker id file exists but is not `workerID=<int>`.
    #[error("malformed worker id file `{path}`")]
    InvalidWorkerIdFile { path: String },

    /// A worker id does not fit the Snowflake layout.
    #[error("worker id {worker_id} outside [0, {max}]")]
    WorkerIdOutOfRange { worker_id: i64, max: i64 },

    /// The configured epoch is not strictly before the current time.
    #[error("epoch {epoch_ms} is not before the current time {now_ms}")]
    EpochInFuture { epoch_ms: i64, now_ms: i64 },

    /// The local clock regressed beyond what the generator tolerates.
    #[error("clock moved backwards by {offset_ms}ms")]
    ClockMovedBackward { offset_ms: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
