use core::time::Duration;
use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    ExceptionCode, IdResult,
    segment::{SegmentAllocator, SegmentBuffer, SegmentConfig},
    store::{AllocationStore, MemoryAllocationStore},
    time::mock::ManualClock,
};

const WINDOW_MS: i64 = 900_000;

fn patient_config() -> SegmentConfig {
    SegmentConfig {
        refill_wait: Duration::from_secs(1),
        ..SegmentConfig::default()
    }
}

trait IdResultExt {
    fn unwrap_id(self) -> i64;
}

impl IdResultExt for IdResult {
    fn unwrap_id(self) -> i64 {
        match self.into_result() {
            Ok(id) => id,
            Err(code) => panic!("unexpected exception ({code:?})"),
        }
    }
}

/// Waits for the background refill of `buffer` to finish.
async fn settle(buffer: &SegmentBuffer) {
    for _ in 0..1_000 {
        if !buffer.is_refill_in_flight() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("refill of `{}` never finished", buffer.tag());
}

#[tokio::test]
async fn requests_before_init_are_not_ready() {
    let store = MemoryAllocationStore::new();
    store.insert("order_id", 0, 100);
    let allocator = SegmentAllocator::new(store, patient_config());

    assert_eq!(
        allocator.get("order_id").await,
        IdResult::exception(ExceptionCode::InitNotReady)
    );
}

#[tokio::test]
async fn unknown_tag_is_key_not_found() {
    let store = MemoryAllocationStore::new();
    store.insert("order_id", 0, 100);
    let allocator = SegmentAllocator::new(store, patient_config());
    assert!(allocator.init().await);

    assert_eq!(
        allocator.get("missing").await,
        IdResult::exception(ExceptionCode::KeyNotFound)
    );
    allocator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn order_id_walks_through_cold_load_and_refill() {
    let store = MemoryAllocationStore::new();
    // The cold load advances the row to max_id 1000 and takes [900, 1000).
    store.insert("order_id", 900, 100);
    let allocator = SegmentAllocator::new(store, patient_config());
    assert!(allocator.init().await);

    for expected in 900..1_000 {
        assert_eq!(allocator.get("order_id").await.unwrap_id(), expected);
    }

    let buffer = allocator.buffer("order_id").unwrap();
    settle(&buffer).await;
    assert!(buffer.is_standby_ready());
    assert_eq!(allocator.store().advance_count(), 2);

    assert_eq!(allocator.get("order_id").await.unwrap_id(), 1_000);
    assert_eq!(buffer.active_index(), 1);
    assert_eq!(allocator.get("order_id").await.unwrap_id(), 1_001);
    allocator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_callers_get_unique_increasing_ids() {
    const TASKS: usize = 8;
    const PER_TASK: usize = 2_000;

    let store = MemoryAllocationStore::new();
    store.insert("hot", 0, 50);
    let allocator = SegmentAllocator::new(store, patient_config());
    assert!(allocator.init().await);

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let allocator = allocator.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::with_capacity(PER_TASK);
            while ids.len() < PER_TASK {
                match allocator.get("hot").await.into_result() {
                    Ok(id) => ids.push(id),
                    // Exhaustion is transient; callers retry.
                    Err(ExceptionCode::SegmentsExhausted) => tokio::task::yield_now().await,
                    Err(code) => panic!("unexpected exception ({code:?})"),
                }
            }
            ids
        }));
    }

    let mut seen = HashSet::with_capacity(TASKS * PER_TASK);
    for handle in handles {
        let ids = handle.await.unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing");
        for id in ids {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(seen.len(), TASKS * PER_TASK);
    allocator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unavailable_store_exhausts_then_recovers() {
    let store = MemoryAllocationStore::new();
    store.insert("t", 0, 10);
    let allocator = SegmentAllocator::new(store, patient_config());
    assert!(allocator.init().await);
    assert_eq!(allocator.get("t").await.unwrap_id(), 0);

    allocator.store().set_available(false);
    for expected in 1..10 {
        assert_eq!(allocator.get("t").await.unwrap_id(), expected);
    }
    assert_eq!(
        allocator.get("t").await,
        IdResult::exception(ExceptionCode::SegmentsExhausted)
    );
    let buffer = allocator.buffer("t").unwrap();
    settle(&buffer).await;
    assert!(!buffer.is_standby_ready());

    allocator.store().set_available(true);
    assert_eq!(allocator.get("t").await.unwrap_id(), 10);
    allocator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_refill_reports_exhaustion_after_bounded_wait() {
    let store = MemoryAllocationStore::new();
    store.insert("t", 0, 5);
    let allocator = SegmentAllocator::new(
        store,
        SegmentConfig {
            refill_wait: Duration::from_millis(5),
            ..SegmentConfig::default()
        },
    );
    assert!(allocator.init().await);
    assert_eq!(allocator.get("t").await.unwrap_id(), 0);

    allocator.store().set_latency(Duration::from_millis(500));
    for expected in 1..5 {
        assert_eq!(allocator.get("t").await.unwrap_id(), expected);
    }
    assert_eq!(
        allocator.get("t").await,
        IdResult::exception(ExceptionCode::SegmentsExhausted)
    );

    allocator.store().set_latency(Duration::ZERO);
    let buffer = allocator.buffer("t").unwrap();
    settle(&buffer).await;
    assert_eq!(allocator.get("t").await.unwrap_id(), 5);
    allocator.shutdown().await;
}

#[tokio::test]
async fn refill_steps_follow_consumption_rate() {
    let clock = Arc::new(ManualClock::new(10 * WINDOW_MS));
    let store = MemoryAllocationStore::new();
    store.insert("t", 0, 10);
    // Refills start halfway through each segment.
    let config = SegmentConfig {
        prefetch_ratio: 0.5,
        ..patient_config()
    };
    let allocator = SegmentAllocator::with_clock(store, Arc::clone(&clock), config);
    assert!(allocator.init().await);

    // Cold load [0, 10); first refill keeps the store step.
    for expected in 0..10 {
        assert_eq!(allocator.get("t").await.unwrap_id(), expected);
    }
    let buffer = allocator.buffer("t").unwrap();
    settle(&buffer).await;
    assert_eq!(buffer.step(), 10);
    assert_eq!(buffer.last_refill_ms(), 10 * WINDOW_MS);

    // Refilling again within the window doubles.
    for expected in 10..20 {
        assert_eq!(allocator.get("t").await.unwrap_id(), expected);
    }
    settle(&buffer).await;
    assert_eq!(buffer.step(), 20);
    for expected in 20..40 {
        assert_eq!(allocator.get("t").await.unwrap_id(), expected);
    }
    settle(&buffer).await;
    assert_eq!(buffer.step(), 40);
    assert_eq!(allocator.store().allocation("t").await.unwrap().max_id, 80);

    // Idle for two windows: halve.
    clock.advance(2 * WINDOW_MS);
    for expected in 40..80 {
        assert_eq!(allocator.get("t").await.unwrap_id(), expected);
    }
    settle(&buffer).await;
    assert_eq!(buffer.step(), 20);
    assert_eq!(buffer.min_step(), 10);

    // Between one and two windows: unchanged.
    clock.advance(WINDOW_MS);
    for expected in 80..100 {
        assert_eq!(allocator.get("t").await.unwrap_id(), expected);
    }
    settle(&buffer).await;
    assert_eq!(buffer.step(), 20);
    assert_eq!(allocator.store().allocation("t").await.unwrap().max_id, 120);
    allocator.shutdown().await;
}

#[tokio::test]
async fn resync_adds_and_removes_tags_only() {
    let store = MemoryAllocationStore::new();
    store.insert("a", 0, 10);
    store.insert("b", 0, 10);
    let allocator = SegmentAllocator::new(store, patient_config());
    assert!(allocator.init().await);

    assert_eq!(allocator.get("b").await.unwrap_id(), 0);
    let before = allocator.buffer("b").unwrap();

    allocator.store().insert("c", 500, 10);
    allocator.store().soft_delete("a");
    allocator.resync().await.unwrap();

    let tags: Vec<_> = allocator.snapshot().into_iter().map(|v| v.tag).collect();
    assert_eq!(tags, vec!["b".to_owned(), "c".to_owned()]);
    assert!(Arc::ptr_eq(&before, &allocator.buffer("b").unwrap()));
    assert_eq!(allocator.get("b").await.unwrap_id(), 1);
    assert_eq!(allocator.get("c").await.unwrap_id(), 500);
    assert_eq!(
        allocator.get("a").await,
        IdResult::exception(ExceptionCode::KeyNotFound)
    );
    allocator.shutdown().await;
}

#[tokio::test]
async fn failed_init_recovers_on_a_later_resync() {
    let store = MemoryAllocationStore::new();
    store.insert("t", 0, 10);
    store.set_available(false);
    let allocator = SegmentAllocator::new(store, patient_config());

    assert!(!allocator.init().await);
    assert!(!allocator.is_ready());
    assert_eq!(
        allocator.get("t").await,
        IdResult::exception(ExceptionCode::InitNotReady)
    );

    allocator.store().set_available(true);
    allocator.resync().await.unwrap();
    assert_eq!(allocator.get("t").await.unwrap_id(), 0);
    allocator.shutdown().await;
}

#[tokio::test]
async fn failed_cold_load_is_retried() {
    let store = MemoryAllocationStore::new();
    store.insert("t", 0, 10);
    let allocator = SegmentAllocator::new(store, patient_config());
    assert!(allocator.init().await);

    allocator.store().set_available(false);
    assert_eq!(
        allocator.get("t").await,
        IdResult::exception(ExceptionCode::InitNotReady)
    );
    assert!(!allocator.buffer("t").unwrap().is_initialized());

    allocator.store().set_available(true);
    assert_eq!(allocator.get("t").await.unwrap_id(), 0);
    allocator.shutdown().await;
}

#[tokio::test]
async fn resync_task_picks_up_new_tags() {
    let store = MemoryAllocationStore::new();
    let allocator = SegmentAllocator::new(
        store,
        SegmentConfig {
            resync_interval: Duration::from_millis(20),
            ..patient_config()
        },
    );
    assert!(allocator.init().await);
    assert_eq!(
        allocator.get("late").await,
        IdResult::exception(ExceptionCode::KeyNotFound)
    );

    allocator.store().insert("late", 0, 10);
    for _ in 0..200 {
        if allocator.buffer("late").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(allocator.get("late").await.unwrap_id(), 0);
    allocator.shutdown().await;
}

#[tokio::test]
async fn snapshot_serializes_buffer_state() {
    let store = MemoryAllocationStore::new();
    store.insert("t", 0, 10);
    let allocator = SegmentAllocator::new(store, patient_config());
    assert!(allocator.init().await);
    assert_eq!(allocator.get("t").await.unwrap_id(), 0);

    let views = allocator.snapshot();
    assert_eq!(views.len(), 1);
    assert!(views[0].initialized);
    assert_eq!(views[0].segments[0].cursor, 1);
    assert_eq!(views[0].segments[0].upper_bound, 10);

    let json = serde_json::to_value(&views).unwrap();
    assert_eq!(json[0]["tag"], "t");
    assert_eq!(json[0]["active_index"], 0);
    allocator.shutdown().await;
}
