use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;

/// One durable row of the allocation table.
///
/// `max_id` is the exclusive high-water mark already granted to some
/// instance. `step` is the configured range size for the tag; refills may
/// advance by a different (dynamic) amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAllocation {
    pub tag: String,
    pub max_id: i64,
    pub step: i64,
    pub description: String,
    pub updated_at_ms: i64,
}

/// A minimal interface over the durable tag table backing segment mode.
///
/// Implementations typically sit on a SQL table with an
/// `UPDATE ... SET max_id = max_id + ?` statement; the only requirement is
/// that each advance is atomic at the store. Advances are not
/// compare-and-swap: concurrent instances advancing the same tag each get a
/// disjoint range because the high-water mark only ever moves forward.
///
/// All futures must be `Send` so that refills can run on background tasks.
pub trait AllocationStore: Send + Sync + 'static {
    /// Returns every live tag.
    fn all_tags(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Returns every live row, for diagnostics.
    fn all_allocations(&self) -> impl Future<Output = Result<Vec<PersistedAllocation>>> + Send;

    /// Reads one row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if the tag is
    /// absent or soft-deleted.
    fn allocation(&self, tag: &str) -> impl Future<Output = Result<PersistedAllocation>> + Send;

    /// Advances `max_id` by the row's own `step`.
    fn advance(&self, tag: &str) -> impl Future<Output = Result<()>> + Send;

    /// Advances `max_id` by a caller-chosen `step`.
    fn advance_by(&self, tag: &str, step: i64) -> impl Future<Output = Result<()>> + Send;

    /// Advances by the row's own step and reads the row back, as one
    /// transaction.
    ///
    /// The read must observe exactly this advance: an interleaved advance
    /// from another instance between the update and the read would hand
    /// both callers the same range.
    fn advance_and_get(
        &self,
        tag: &str,
    ) -> impl Future<Output = Result<PersistedAllocation>> + Send;

    /// Advances by `step` and reads the row back, as one transaction.
    fn advance_by_and_get(
        &self,
        tag: &str,
        step: i64,
    ) -> impl Future<Output = Result<PersistedAllocation>> + Send;
}

impl<S: AllocationStore> AllocationStore for Arc<S> {
    fn all_tags(&self) -> impl Future<Output = Result<Vec<String>>> + Send {
        (**self).all_tags()
    }

    fn all_allocations(&self) -> impl Future<Output = Result<Vec<PersistedAllocation>>> + Send {
        (**self).all_allocations()
    }

    fn allocation(&self, tag: &str) -> impl Future<Output = Result<PersistedAllocation>> + Send {
        (**self).allocation(tag)
    }

    fn advance(&self, tag: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).advance(tag)
    }

    fn advance_by(&self, tag: &str, step: i64) -> impl Future<Output = Result<()>> + Send {
        (**self).advance_by(tag, step)
    }

    fn advance_and_get(
        &self,
        tag: &str,
    ) -> impl Future<Output = Result<PersistedAllocation>> + Send {
        (**self).advance_and_get(tag)
    }

    fn advance_by_and_get(
        &self,
        tag: &str,
        step: i64,
    ) -> impl Future<Output = Result<PersistedAllocation>> + Send {
        (**self).advance_by_and_get(tag, step)
    }
}
