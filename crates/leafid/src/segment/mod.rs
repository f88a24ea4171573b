//! Segment mode: per-tag double-buffered id ranges backed by an
//! [`AllocationStore`](crate::store::AllocationStore).
//!
//! Each tag owns a [`SegmentBuffer`] with two [`Segment`]s. One is active and
//! drained by an atomic cursor; the other is refilled in the background once
//! the active range runs low, so that request threads rarely wait on the
//! store. Refill sizes adapt to the observed consumption rate (see
//! [`next_step`]).
//!
//! ## Structure
//!
//! - [`buffer`] - `Segment` and `SegmentBuffer` state.
//! - [`allocator`] - `SegmentAllocator`, the tag cache and its read path.
//! - [`step`] - dynamic step sizing.

mod allocator;
mod buffer;
mod config;
mod step;
#[cfg(test)]
mod tests;

pub use allocator::*;
pub use buffer::*;
pub use config::*;
pub use step::*;
