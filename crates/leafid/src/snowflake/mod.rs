//! Snowflake mode: time-ordered 64-bit ids from a timestamp, a worker id
//! and a per-millisecond sequence.
//!
//! The worker id comes from static configuration or from a
//! [`WorkerIdCoordinator`](crate::coordinator::WorkerIdCoordinator) at
//! startup; afterwards generation is purely local.

mod generator;
mod layout;

pub use generator::*;
pub use layout::*;
