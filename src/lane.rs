//! Lanes: per-caller redo-log reservations (component C7).
//!
//! A lane is a fixed slot in the lane pool reserved right after the heap
//! header. A caller holds one for the duration of an allocator operation
//! that needs crash-atomicity, stages its metadata mutations into the
//! lane's [`RedoLog`], and releases the lane once the log has been applied.
//! Recovery walks every lane and replays whatever it finds still
//! committed, regardless of which thread owned it before the crash.

use crate::alloc::layout::HeapConfig;
use crate::pmem::PmemOps;
use crate::redo::{RedoEntry, RedoLog, REDO_LOG_SIZE};
use parking_lot::Mutex;

/// The lane pool: `cfg.num_lanes` fixed-size redo logs plus a volatile
/// free-list of which ones are currently unclaimed.
pub struct LanePool {
    logs: Vec<RedoLog>,
    free: Mutex<Vec<usize>>,
}

impl LanePool {
    pub fn new(cfg: &HeapConfig) -> Self {
        let logs = (0..cfg.num_lanes as usize)
            .map(|i| RedoLog::new(crate::alloc::layout::lanes_region_offset() + i * REDO_LOG_SIZE))
            .collect();
        let free = Mutex::new((0..cfg.num_lanes as usize).collect());
        LanePool { logs, free }
    }

    pub fn num_lanes(&self) -> usize {
        self.logs.len()
    }

    /// Claims an unused lane, blocking (via a short spin/yield loop) until
    /// one is free. Lanes are scoped, not owned across awaits, so this
    /// never blocks for long in practice.
    pub fn hold(&self) -> LaneGuard<'_> {
        loop {
            if let Some(id) = self.free.lock().pop() {
                return LaneGuard { pool: self, id };
            }
            std::thread::yield_now();
        }
    }

    fn release(&self, id: usize) {
        self.free.lock().push(id);
    }

    /// Called once at pool-open time: replays any lane whose log committed
    /// but was never applied before the crash. Order across lanes does not
    /// matter — each lane's entries are independent of every other lane's.
    pub fn recover<P: PmemOps>(&self, pmem: &P) {
        for log in &self.logs {
            log.recover(pmem);
        }
    }
}

/// An exclusively held lane. Dropping it returns the lane to the pool.
pub struct LaneGuard<'p> {
    pool: &'p LanePool,
    id: usize,
}

impl<'p> LaneGuard<'p> {
    /// Commits `entries` as one crash-atomic batch through this lane's redo
    /// log, applying them before returning.
    pub fn commit<P: PmemOps>(&self, pmem: &P, entries: &[RedoEntry]) {
        self.pool.logs[self.id].store(pmem, entries);
    }
}

impl<'p> Drop for LaneGuard<'p> {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
