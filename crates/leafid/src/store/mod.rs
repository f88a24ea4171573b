//! The persistent allocation store contract and an in-memory implementation.
//!
//! The store is the sole cross-instance synchronization point of segment
//! mode: every refill atomically advances a tag's `max_id` and reads the row
//! back, and global uniqueness follows from `max_id` only moving forward.

mod interface;
mod memory;

pub use interface::*;
pub use memory::*;
