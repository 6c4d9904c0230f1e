//! Per-partition ring buffer (spec §4.B): reassembles parsed rows into
//! contiguous, offset-ordered batches despite out-of-order arrival from a
//! parallel parsing pool.

use crate::model::MsgRow;
use std::time::Instant;
use tokio::sync::Mutex;

/// Outcome of `Ring::put_elem`.
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The row was placed at `offset mod cap`.
    Placed,
    /// `offset < filled`: already emitted, re-delivery. Dropped.
    TooSmall,
    /// `offset >= ground + cap`: the window cannot grow further without a
    /// flush. The caller should force a flush and retry (or, if a schema
    /// change is pending, suppress this entirely — spec §4.F).
    WindowFull,
}

/// A dense, offset-contiguous run of rows flushed out of the ring,
/// covering input offsets `[start_offset, start_offset + msgrows.len())`.
#[derive(Debug)]
pub struct RingEmission {
    pub partition: i32,
    pub start_offset: i64,
    pub msgrows: Vec<MsgRow>,
}

struct RingState {
    slots: Vec<Option<MsgRow>>,
    /// Smallest offset currently representable.
    ground: i64,
    /// Next offset expected to be committed (smallest not yet emitted).
    filled: i64,
    /// One past the largest offset ever inserted.
    ceiling: i64,
    idle_cnt: u32,
    is_idle: bool,
    activity_since_last_tick: bool,
}

pub struct Ring {
    pub partition: i32,
    cap: usize,
    batch_size: usize,
    state: Mutex<RingState>,
}

pub(crate) fn next_pow2(mut v: usize) -> usize {
    if v <= 1 {
        return 1;
    }
    v -= 1;
    let mut shift = 1;
    while shift < usize::BITS as usize {
        v |= v >> shift;
        shift <<= 1;
    }
    v + 1
}

impl Ring {
    /// `cap` is a power of two equal to twice the configured batch size
    /// (spec §3), giving headroom for reordering without dynamic growth.
    pub fn new(partition: i32, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let cap = next_pow2(batch_size * 2);
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || None);
        Self {
            partition,
            cap,
            batch_size,
            state: Mutex::new(RingState {
                slots,
                ground: 0,
                filled: 0,
                ceiling: 0,
                idle_cnt: 0,
                is_idle: false,
                activity_since_last_tick: false,
            }),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Insertion policy (spec §4.B). Does not itself sleep or flush on a
    /// full window — the caller does that and retries.
    pub async fn put_elem(&self, msg_row: MsgRow) -> PutOutcome {
        let offset = msg_row.offset();
        let mut st = self.state.lock().await;

        if offset < st.filled {
            return PutOutcome::TooSmall;
        }
        if offset >= st.ground + self.cap as i64 {
            return PutOutcome::WindowFull;
        }

        let idx = (offset as usize) % self.cap;
        st.slots[idx] = Some(msg_row);
        if offset + 1 > st.ceiling {
            st.ceiling = offset + 1;
        }
        st.idle_cnt = 0;
        st.is_idle = false;
        st.activity_since_last_tick = true;
        PutOutcome::Placed
    }

    /// Walks from `filled` while consecutive slots are occupied, collecting
    /// rows until either the batch-size threshold is reached, a gap is
    /// found, or `force` (flush timer / schema drain) says to take whatever
    /// contiguous prefix exists regardless of size (spec §4.B Emission).
    pub async fn force_batch_or_shard(&self, force: bool) -> Option<RingEmission> {
        let mut st = self.state.lock().await;

        if st.ceiling == st.filled {
            // No-op: reset idle/activity bookkeeping for the timer but
            // nothing to emit.
            return None;
        }

        let mut k: usize = 0;
        while st.filled + (k as i64) < st.ceiling {
            let idx = ((st.filled + k as i64) as usize) % self.cap;
            if st.slots[idx].is_none() {
                break;
            }
            k += 1;
            if !force && k >= self.batch_size {
                break;
            }
        }

        if k == 0 {
            return None;
        }

        let start_offset = st.filled;
        let mut msgrows = Vec::with_capacity(k);
        for i in 0..k {
            let idx = ((start_offset + i as i64) as usize) % self.cap;
            msgrows.push(st.slots[idx].take().expect("slot occupied by scan above"));
        }

        st.filled += k as i64;
        st.ground = st.filled;

        Some(RingEmission {
            partition: self.partition,
            start_offset,
            msgrows,
        })
    }

    /// Called once per flush-timer tick. Marks the ring idle (and eligible
    /// for pruning by the supervisor) if no producer activity occurred
    /// since the previous tick.
    pub async fn tick_idle(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.activity_since_last_tick {
            st.idle_cnt = 0;
            st.is_idle = false;
        } else {
            st.idle_cnt = st.idle_cnt.saturating_add(1);
            st.is_idle = true;
        }
        st.activity_since_last_tick = false;
        st.is_idle
    }

    pub async fn is_idle(&self) -> bool {
        self.state.lock().await.is_idle
    }

    pub async fn snapshot(&self) -> (i64, i64, i64) {
        let st = self.state.lock().await;
        (st.ground, st.filled, st.ceiling)
    }
}

/// No-op timer-facing helper kept for readability at call sites; present
/// so a reader isn't surprised `Instant` is otherwise unused here.
#[allow(dead_code)]
fn now() -> Instant {
    Instant::now()
}
