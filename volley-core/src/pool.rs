use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Slots currently executing an iteration.
    pub active: u64,
    /// Slots created so far (warm + lazily grown).
    pub allocated: u64,
    pub peak_active: u64,
    pub max_vus: u64,
}

#[derive(Debug)]
struct PoolState {
    active: u64,
    allocated: u64,
    peak_active: u64,
    idle: Vec<u64>,
}

/// Bounded set of execution slots ("virtual users").
///
/// Starts with `pre_allocated` warm slots and grows lazily up to `max_vus`. The number of
/// concurrently held [`Slot`]s never exceeds `max_vus`.
#[derive(Debug)]
pub struct WorkerPool {
    state: Mutex<PoolState>,
    max_vus: u64,
    notify: Notify,
}

impl WorkerPool {
    #[must_use]
    pub fn new(pre_allocated: u64, max_vus: u64) -> Arc<Self> {
        let pre_allocated = pre_allocated.min(max_vus);
        Arc::new(Self {
            state: Mutex::new(PoolState {
                active: 0,
                allocated: pre_allocated,
                peak_active: 0,
                idle: (0..pre_allocated).rev().collect(),
            }),
            max_vus,
            notify: Notify::new(),
        })
    }

    pub fn max_vus(&self) -> u64 {
        self.max_vus
    }

    /// Claims a free slot, or returns `None` immediately when all `max_vus` slots are busy.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Slot> {
        self.try_acquire_below(self.max_vus)
    }

    /// Like [`Self::try_acquire`], treating `limit` (capped at `max_vus`) as the ceiling.
    pub fn try_acquire_below(self: &Arc<Self>, limit: u64) -> Option<Slot> {
        let limit = limit.min(self.max_vus);
        let mut st = self.state.lock();
        if st.active >= limit {
            return None;
        }

        let id = match st.idle.pop() {
            Some(id) => id,
            None => {
                let id = st.allocated;
                st.allocated += 1;
                tracing::debug!(vu = id, allocated = st.allocated, "growing worker pool");
                id
            }
        };

        st.active += 1;
        st.peak_active = st.peak_active.max(st.active);

        Some(Slot {
            id,
            pool: Arc::clone(self),
        })
    }

    /// Waits until fewer than `limit` slots are active, then claims one.
    pub async fn acquire_below(self: &Arc<Self>, limit: u64) -> Slot {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(slot) = self.try_acquire_below(limit) {
                return slot;
            }
            notified.await;
        }
    }

    fn release(&self, id: u64) {
        {
            let mut st = self.state.lock();
            st.active = st.active.saturating_sub(1);
            st.idle.push(id);
        }
        self.notify.notify_waiters();
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.state.lock();
        PoolStats {
            active: st.active,
            allocated: st.allocated,
            peak_active: st.peak_active,
            max_vus: self.max_vus,
        }
    }
}

/// A claimed execution slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct Slot {
    id: u64,
    pool: Arc<WorkerPool>,
}

impl Slot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
