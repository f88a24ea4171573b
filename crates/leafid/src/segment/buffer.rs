use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};

/// One pre-allocated id range `[upper_bound - step, upper_bound)` drained by
/// incrementing `cursor`.
///
/// The cursor is allowed to run past `upper_bound`: every draw past the end
/// simply reports exhaustion. A segment is recycled in place on each refill.
#[derive(Debug)]
pub struct Segment {
    cursor: AtomicI64,
    upper_bound: AtomicI64,
    step: AtomicI64,
}

impl Segment {
    const fn empty() -> Self {
        Self {
            cursor: AtomicI64::new(0),
            upper_bound: AtomicI64::new(0),
            step: AtomicI64::new(0),
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn upper_bound(&self) -> i64 {
        self.upper_bound.load(Ordering::Acquire)
    }

    pub fn step(&self) -> i64 {
        self.step.load(Ordering::Acquire)
    }

    /// Ids left before the segment is exhausted.
    pub fn remaining(&self) -> i64 {
        (self.upper_bound() - self.cursor()).max(0)
    }

    fn install(&self, max_id: i64, step: i64) {
        self.step.store(step, Ordering::Release);
        self.upper_bound.store(max_id, Ordering::Release);
        self.cursor.store(max_id - step, Ordering::Release);
    }

    fn view(&self) -> SegmentView {
        SegmentView {
            cursor: self.cursor(),
            upper_bound: self.upper_bound(),
            step: self.step(),
        }
    }
}

#[derive(Debug)]
struct BufferState {
    active: usize,
    standby_ready: bool,
}

/// Outcome of a single draw from the active segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Draw {
    /// The issued id, or `None` when the active segment is exhausted.
    pub(crate) id: Option<i64>,
    /// The caller won the single-flight flag and must start a refill.
    pub(crate) start_refill: bool,
}

/// The per-tag pair of segments plus the state that coordinates request
/// threads with the background refill.
///
/// `active` and `standby_ready` only change under the write lock. Request
/// threads draw under the read lock, so a switch never races a draw. The
/// standby segment is written by the refill task alone, which owns it while
/// `refill_in_flight` is set.
#[derive(Debug)]
pub struct SegmentBuffer {
    tag: String,
    segments: [Segment; 2],
    state: RwLock<BufferState>,
    initialized: AtomicBool,
    refill_in_flight: AtomicBool,
    step: AtomicI64,
    min_step: AtomicI64,
    last_refill_ms: AtomicI64,
    load_lock: Mutex<()>,
    refilled: Notify,
}

impl SegmentBuffer {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            segments: [Segment::empty(), Segment::empty()],
            state: RwLock::new(BufferState {
                active: 0,
                standby_ready: false,
            }),
            initialized: AtomicBool::new(false),
            refill_in_flight: AtomicBool::new(false),
            step: AtomicI64::new(0),
            min_step: AtomicI64::new(0),
            last_refill_ms: AtomicI64::new(0),
            load_lock: Mutex::new(()),
            refilled: Notify::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_refill_in_flight(&self) -> bool {
        self.refill_in_flight.load(Ordering::Acquire)
    }

    /// Current refill size.
    pub fn step(&self) -> i64 {
        self.step.load(Ordering::Acquire)
    }

    /// Floor for dynamic shrinking: the store's configured step.
    pub fn min_step(&self) -> i64 {
        self.min_step.load(Ordering::Acquire)
    }

    pub fn last_refill_ms(&self) -> i64 {
        self.last_refill_ms.load(Ordering::Acquire)
    }

    pub fn segment(&self, index: usize) -> &Segment {
        &self.segments[index & 1]
    }

    pub fn active_index(&self) -> usize {
        self.state.read().active
    }

    pub fn is_standby_ready(&self) -> bool {
        self.state.read().standby_ready
    }

    /// Serializes cold loads of this buffer.
    pub(crate) const fn load_lock(&self) -> &Mutex<()> {
        &self.load_lock
    }

    pub(crate) const fn refilled(&self) -> &Notify {
        &self.refilled
    }

    /// Installs the first range into the active segment and marks the buffer
    /// initialized.
    pub(crate) fn install_initial(&self, max_id: i64, step: i64) {
        let state = self.state.write();
        self.segments[state.active].install(max_id, step);
        self.step.store(step, Ordering::Release);
        self.min_step.store(step, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }

    /// Draws one id from the active segment.
    ///
    /// Checks the prefetch threshold first and claims the refill flag when
    /// fewer than `threshold(step)` ids remain and the standby is empty.
    pub(crate) fn draw(&self, threshold: impl Fn(i64) -> i64) -> Draw {
        let state = self.state.read();
        let segment = &self.segments[state.active];

        let start_refill = !state.standby_ready
            && segment.remaining() < threshold(segment.step())
            && self
                .refill_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        let value = segment.cursor.fetch_add(1, Ordering::AcqRel);
        let id = (value < segment.upper_bound()).then_some(value);
        Draw { id, start_refill }
    }

    /// Index of the segment a refill should write to.
    pub(crate) fn standby_index(&self) -> usize {
        1 - self.state.read().active
    }

    /// Loads a refilled range into the standby segment and publishes it.
    pub(crate) fn install_standby(&self, max_id: i64, step: i64, min_step: i64, now_ms: i64) {
        let mut state = self.state.write();
        self.segments[1 - state.active].install(max_id, step);
        self.step.store(step, Ordering::Release);
        self.min_step.store(min_step, Ordering::Release);
        self.last_refill_ms.store(now_ms, Ordering::Release);
        state.standby_ready = true;
    }

    /// Clears the single-flight flag and wakes every waiter.
    pub(crate) fn finish_refill(&self) {
        self.refill_in_flight.store(false, Ordering::Release);
        self.refilled.notify_waiters();
    }

    /// Makes the standby segment active if the active one is exhausted.
    ///
    /// Returns `true` when the caller should draw again: either this call
    /// switched, or another thread already did.
    pub(crate) fn switch_if_exhausted(&self) -> bool {
        let mut state = self.state.write();
        let active = &self.segments[state.active];
        if active.cursor() < active.upper_bound() {
            return true;
        }
        if state.standby_ready {
            state.active = 1 - state.active;
            state.standby_ready = false;
            true
        } else {
            false
        }
    }

    /// A consistent copy of the buffer state for diagnostics.
    pub fn view(&self) -> BufferView {
        let state = self.state.read();
        BufferView {
            tag: self.tag.clone(),
            initialized: self.is_initialized(),
            active_index: state.active,
            standby_ready: state.standby_ready,
            refill_in_flight: self.is_refill_in_flight(),
            step: self.step(),
            min_step: self.min_step(),
            last_refill_ms: self.last_refill_ms(),
            segments: [self.segments[0].view(), self.segments[1].view()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentView {
    pub cursor: i64,
    pub upper_bound: i64,
    pub step: i64,
}

/// Serializable snapshot of one [`SegmentBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferView {
    pub tag: String,
    pub initialized: bool,
    pub active_index: usize,
    pub standby_ready: bool,
    pub refill_in_flight: bool,
    pub step: i64,
    pub min_step: i64,
    pub last_refill_ms: i64,
    pub segments: [SegmentView; 2],
}
