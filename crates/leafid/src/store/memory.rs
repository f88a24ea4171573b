use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::{
    Error, Result, SystemClock, TimeSource,
    store::{AllocationStore, PersistedAllocation},
};

struct Row {
    allocation: PersistedAllocation,
    deleted: bool,
}

/// An [`AllocationStore`] held in process memory.
///
/// Every operation takes a single lock, so each advance-and-read is atomic
/// exactly like a transactional SQL update. Useful for tests and for running
/// a standalone server; ranges are of course not durable across restarts.
///
/// The store can simulate an outage ([`set_available`]) and a round-trip
/// latency ([`set_latency`]) to exercise the allocator's failure paths.
///
/// [`set_available`]: MemoryAllocationStore::set_available
/// [`set_latency`]: MemoryAllocationStore::set_latency
pub struct MemoryAllocationStore {
    rows: Mutex<BTreeMap<String, Row>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    advances: AtomicU64,
}

impl Default for MemoryAllocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAllocationStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            advances: AtomicU64::new(0),
        }
    }

    /// Inserts (or replaces) a live row.
    pub fn insert(&self, tag: impl Into<String>, max_id: i64, step: i64) {
        self.insert_with_description(tag, max_id, step, "");
    }

    pub fn insert_with_description(
        &self,
        tag: impl Into<String>,
        max_id: i64,
        step: i64,
        description: impl Into<String>,
    ) {
        let tag = tag.into();
        let allocation = PersistedAllocation {
            tag: tag.clone(),
            max_id,
            step,
            description: description.into(),
            updated_at_ms: SystemClock.current_millis(),
        };
        self.rows.lock().insert(
            tag,
            Row {
                allocation,
                deleted: false,
            },
        );
    }

    /// Marks a row deleted without removing it; it disappears from every
    /// read.
    pub fn soft_delete(&self, tag: &str) -> bool {
        match self.rows.lock().get_mut(tag) {
            Some(row) => {
                row.deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of successful advances so far.
    pub fn advance_count(&self) -> u64 {
        self.advances.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("store marked unavailable".into()))
        }
    }

    fn advance_locked(&self, tag: &str, step: Option<i64>) -> Result<PersistedAllocation> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(tag)
            .filter(|row| !row.deleted)
            .ok_or_else(|| Error::NotFound(tag.to_owned()))?;

        let step = step.unwrap_or(row.allocation.step);
        row.allocation.max_id = row.allocation.max_id.checked_add(step).ok_or_else(|| {
            Error::InvalidAllocation {
                tag: tag.to_owned(),
                reason: "max_id overflow".into(),
            }
        })?;
        row.allocation.updated_at_ms = SystemClock.current_millis();
        self.advances.fetch_add(1, Ordering::SeqCst);
        Ok(row.allocation.clone())
    }
}

impl AllocationStore for MemoryAllocationStore {
    async fn all_tags(&self) -> Result<Vec<String>> {
        self.round_trip().await?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|(_, row)| !row.deleted)
            .map(|(tag, _)| tag.clone())
            .collect())
    }

    async fn all_allocations(&self) -> Result<Vec<PersistedAllocation>> {
        self.round_trip().await?;
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| !row.deleted)
            .map(|row| row.allocation.clone())
            .collect())
    }

    async fn allocation(&self, tag: &str) -> Result<PersistedAllocation> {
        self.round_trip().await?;
        self.rows
            .lock()
            .get(tag)
            .filter(|row| !row.deleted)
            .map(|row| row.allocation.clone())
            .ok_or_else(|| Error::NotFound(tag.to_owned()))
    }

    async fn advance(&self, tag: &str) -> Result<()> {
        self.round_trip().await?;
        self.advance_locked(tag, None).map(|_| ())
    }

    async fn advance_by(&self, tag: &str, step: i64) -> Result<()> {
        self.round_trip().await?;
        self.advance_locked(tag, Some(step)).map(|_| ())
    }

    async fn advance_and_get(&self, tag: &str) -> Result<PersistedAllocation> {
        self.round_trip().await?;
        self.advance_locked(tag, None)
    }

    async fn advance_by_and_get(&self, tag: &str, step: i64) -> Result<PersistedAllocation> {
        self.round_trip().await?;
        self.advance_locked(tag, Some(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advances_by_row_step_and_custom_step() {
        let store = MemoryAllocationStore::new();
        store.insert("order_id", 1_000, 100);

        let row = store.advance_and_get("order_id").await.unwrap();
        assert_eq!(row.max_id, 1_100);
        assert_eq!(row.step, 100);

        let row = store.advance_by_and_get("order_id", 250).await.unwrap();
        assert_eq!(row.max_id, 1_350);
        // The configured step is untouched by custom advances.
        assert_eq!(row.step, 100);

        store.advance("order_id").await.unwrap();
        store.advance_by("order_id", 50).await.unwrap();
        assert_eq!(store.allocation("order_id").await.unwrap().max_id, 1_500);
        assert_eq!(store.advance_count(), 4);
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_invisible() {
        let store = MemoryAllocationStore::new();
        store.insert("a", 0, 10);
        store.insert_with_description("b", 0, 10, "billing");
        assert!(store.soft_delete("a"));
        assert!(!store.soft_delete("missing"));

        assert_eq!(store.all_tags().await.unwrap(), vec!["b".to_owned()]);
        let rows = store.all_allocations().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description, "billing");
        assert!(matches!(
            store.allocation("a").await,
            Err(Error::NotFound(tag)) if tag == "a"
        ));
        assert!(matches!(store.advance("a").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryAllocationStore::new();
        store.insert("a", 0, 10);
        store.set_available(false);

        assert!(matches!(store.all_tags().await, Err(Error::StoreUnavailable(_))));
        assert!(matches!(
            store.advance_and_get("a").await,
            Err(Error::StoreUnavailable(_))
        ));
        assert_eq!(store.advance_count(), 0);

        store.set_available(true);
        assert_eq!(store.advance_and_get("a").await.unwrap().max_id, 10);
    }
}
