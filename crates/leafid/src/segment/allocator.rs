use std::collections::HashSet;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, ExceptionCode, IdGen, IdResult, Result, SystemClock, TimeSource,
    segment::{BufferView, SegmentBuffer, SegmentConfig, next_step},
    store::{AllocationStore, PersistedAllocation},
};

/// Serves ids for every tag in an [`AllocationStore`] from per-tag
/// [`SegmentBuffer`]s.
///
/// The allocator is a cheap handle: clones share the same tag cache and
/// background tasks. Call [`init`](Self::init) once before serving and
/// [`shutdown`](Self::shutdown) to stop the resync task.
///
/// # Example
///
/// ```
/// use leafid::{
///     IdResult,
///     segment::{SegmentAllocator, SegmentConfig},
///     store::MemoryAllocationStore,
/// };
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryAllocationStore::new();
/// store.insert("order_id", 0, 1_000);
///
/// let allocator = SegmentAllocator::new(store, SegmentConfig::default());
/// assert!(allocator.init().await);
/// assert_eq!(allocator.get("order_id").await, IdResult::success(0));
/// assert_eq!(allocator.get("order_id").await, IdResult::success(1));
/// allocator.shutdown().await;
/// # });
/// ```
pub struct SegmentAllocator<S, T = SystemClock>
where
    S: AllocationStore,
    T: TimeSource + 'static,
{
    inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for SegmentAllocator<S, T>
where
    S: AllocationStore,
    T: TimeSource + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, T> {
    store: S,
    clock: T,
    config: SegmentConfig,
    cache: DashMap<String, Arc<SegmentBuffer>>,
    ready: AtomicBool,
    shutdown: CancellationToken,
    resync_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> SegmentAllocator<S, SystemClock>
where
    S: AllocationStore,
{
    pub fn new(store: S, config: SegmentConfig) -> Self {
        Self::with_clock(store, SystemClock, config)
    }
}

impl<S, T> SegmentAllocator<S, T>
where
    S: AllocationStore,
    T: TimeSource + 'static,
{
    /// Creates an allocator reading refill timestamps from `clock`.
    pub fn with_clock(store: S, clock: T, config: SegmentConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                config,
                cache: DashMap::new(),
                ready: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                resync_task: Mutex::new(None),
            }),
        }
    }

    /// Loads the tag set and starts the periodic resync task.
    ///
    /// Returns `false` if the store could not be read. The resync task is
    /// started regardless, and requests start succeeding once one of its
    /// passes reaches the store.
    pub async fn init(&self) -> bool {
        let loaded = match self.inner.resync().await {
            Ok(()) => true,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %_e, "initial segment tag load failed");
                false
            }
        };

        let mut task = self.inner.resync_task.lock();
        if task.is_none() && !self.inner.shutdown.is_cancelled() {
            *task = Some(tokio::spawn(resync_loop(
                Arc::downgrade(&self.inner),
                self.inner.shutdown.clone(),
                self.inner.config.resync_interval,
            )));
        }
        loaded
    }

    /// Issues the next id for `tag`.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn get(&self, tag: &str) -> IdResult {
        if !self.inner.ready.load(Ordering::Acquire) {
            return IdResult::exception(ExceptionCode::InitNotReady);
        }
        let Some(buffer) = self.buffer(tag) else {
            return IdResult::exception(ExceptionCode::KeyNotFound);
        };

        if !buffer.is_initialized() {
            if let Err(_e) = self.inner.cold_load(&buffer).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(tag, error = %_e, "segment cold load failed");
                return IdResult::exception(ExceptionCode::InitNotReady);
            }
        }
        self.inner.issue(&buffer).await
    }

    /// Re-reads the tag set now instead of waiting for the next tick.
    ///
    /// # Errors
    ///
    /// Returns the store error if the tag list could not be read; the cache
    /// is left untouched in that case.
    pub async fn resync(&self) -> Result<()> {
        self.inner.resync().await
    }

    /// Diagnostic view of every cached buffer, ordered by tag.
    pub fn snapshot(&self) -> Vec<BufferView> {
        let mut views: Vec<_> = self
            .inner
            .cache
            .iter()
            .map(|entry| entry.value().view())
            .collect();
        views.sort_by(|a, b| a.tag.cmp(&b.tag));
        views
    }

    /// Lists the persisted rows behind the cache.
    ///
    /// # Errors
    ///
    /// Propagates the store error.
    pub async fn allocations(&self) -> Result<Vec<PersistedAllocation>> {
        self.inner.store.all_allocations().await
    }

    pub fn buffer(&self, tag: &str) -> Option<Arc<SegmentBuffer>> {
        self.inner.cache.get(tag).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Stops the resync task and waits for it to exit.
    ///
    /// Refills already running are left to complete.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.inner.resync_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl<S, T> Inner<S, T>
where
    S: AllocationStore,
    T: TimeSource + 'static,
{
    async fn resync(&self) -> Result<()> {
        let tags = self.store.all_tags().await?;
        let live: HashSet<&str> = tags.iter().map(String::as_str).collect();

        let mut _added = 0usize;
        for tag in &tags {
            if let Entry::Vacant(slot) = self.cache.entry(tag.clone()) {
                slot.insert(Arc::new(SegmentBuffer::new(tag.clone())));
                _added += 1;
            }
        }

        let mut _removed = 0usize;
        self.cache.retain(|tag, _| {
            let keep = live.contains(tag.as_str());
            if !keep {
                _removed += 1;
            }
            keep
        });

        self.ready.store(true, Ordering::Release);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            tags = tags.len(),
            added = _added,
            removed = _removed,
            "segment tags resynced"
        );
        Ok(())
    }

    /// First load of a buffer, serialized per buffer.
    async fn cold_load(&self, buffer: &SegmentBuffer) -> Result<()> {
        let _guard = buffer.load_lock().lock().await;
        if buffer.is_initialized() {
            return Ok(());
        }

        let row = self.store.advance_and_get(buffer.tag()).await?;
        check_range(&row, row.step)?;
        buffer.install_initial(row.max_id, row.step);

        #[cfg(feature = "tracing")]
        tracing::info!(
            tag = buffer.tag(),
            lower = row.max_id - row.step,
            upper = row.max_id,
            "segment buffer loaded"
        );
        Ok(())
    }

    async fn issue(self: &Arc<Self>, buffer: &Arc<SegmentBuffer>) -> IdResult {
        // One extra round lets a caller that lost the race for the refill
        // flag claim the next refill itself before giving up.
        let mut retried = false;
        loop {
            let draw = buffer.draw(|step| self.config.prefetch_threshold(step));
            if draw.start_refill {
                self.spawn_refill(Arc::clone(buffer));
            }
            if let Some(id) = draw.id {
                return IdResult::success(id);
            }

            self.wait_for_refill(buffer).await;
            if buffer.switch_if_exhausted() {
                continue;
            }
            if retried {
                #[cfg(feature = "tracing")]
                tracing::warn!(tag = buffer.tag(), "both segments exhausted");
                return IdResult::exception(ExceptionCode::SegmentsExhausted);
            }
            retried = true;
        }
    }

    /// Waits up to `refill_wait` for the in-flight refill, if any.
    async fn wait_for_refill(&self, buffer: &SegmentBuffer) {
        let notified = buffer.refilled().notified();
        tokio::pin!(notified);
        // Register before checking the flag so a refill finishing in between
        // still wakes us.
        notified.as_mut().enable();
        if buffer.is_refill_in_flight() {
            let _ = tokio::time::timeout(self.config.refill_wait, notified).await;
        }
    }

    fn spawn_refill(self: &Arc<Self>, buffer: Arc<SegmentBuffer>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(_e) = inner.refill(&buffer).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(tag = buffer.tag(), error = %_e, "segment refill failed");
            }
            buffer.finish_refill();
        });
    }

    async fn refill(&self, buffer: &SegmentBuffer) -> Result<()> {
        let now = self.clock.current_millis();
        let last = buffer.last_refill_ms();

        let (row, step) = if last == 0 {
            let row = self.store.advance_and_get(buffer.tag()).await?;
            let step = row.step;
            (row, step)
        } else {
            let step = next_step(buffer.step(), buffer.min_step(), now - last, &self.config);
            (self.store.advance_by_and_get(buffer.tag(), step).await?, step)
        };
        check_range(&row, step)?;
        buffer.install_standby(row.max_id, step, row.step, now);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            tag = buffer.tag(),
            step,
            upper = row.max_id,
            "standby segment refilled"
        );
        Ok(())
    }
}

async fn resync_loop<S, T>(
    inner: Weak<Inner<S, T>>,
    shutdown: CancellationToken,
    period: core::time::Duration,
) where
    S: AllocationStore,
    T: TimeSource + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(strong) = inner.upgrade() else { break };
                if let Err(_e) = strong.resync().await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "segment tag resync failed");
                }
            }
        }
    }
    #[cfg(feature = "tracing")]
    tracing::debug!("segment resync task stopped");
}

fn check_range(row: &PersistedAllocation, step: i64) -> Result<()> {
    if step <= 0 {
        return Err(Error::InvalidAllocation {
            tag: row.tag.clone(),
            reason: format!("non-positive step {step}"),
        });
    }
    if row.max_id < step {
        return Err(Error::InvalidAllocation {
            tag: row.tag.clone(),
            reason: format!("max_id {} below step {step}", row.max_id),
        });
    }
    Ok(())
}

impl<S, T> IdGen for SegmentAllocator<S, T>
where
    S: AllocationStore,
    T: TimeSource + 'static,
{
    async fn init(&self) -> bool {
        Self::init(self).await
    }

    async fn get(&self, tag: &str) -> IdResult {
        Self::get(self, tag).await
    }
}
