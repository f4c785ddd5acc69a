//! A `PmemOps` implementation that records every `persist` call so a test
//! can materialize the heap's state as of an arbitrary point in that
//! sequence — standing in for "the machine lost power here" (spec §8's
//! crash-point scenarios).
//!
//! Writes still land in the live buffer immediately, exactly like
//! [`palloc::pmem::test_util::VecPmem`]; what this adds is an ordered log of
//! `(offset, bytes)` snapshots, one per `persist` call, which
//! [`CrashSimPmem::snapshot_after`] replays from an all-zero buffer to
//! reconstruct what would be durable if everything after that point had
//! never made it past a volatile cache.

use palloc::pmem::PmemOps;
use std::cell::UnsafeCell;
use std::sync::Mutex;

pub struct CrashSimPmem {
    buf: UnsafeCell<Vec<u8>>,
    log: Mutex<Vec<(usize, Vec<u8>)>>,
}

unsafe impl Sync for CrashSimPmem {}

impl CrashSimPmem {
    pub fn new(len: usize) -> Self {
        CrashSimPmem {
            buf: UnsafeCell::new(vec![0u8; len]),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Number of `persist` calls recorded so far. Read this before and after
    /// an operation to bracket the persist calls it made.
    pub fn persist_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Rebuilds the durable image as of right after the `n`th recorded
    /// persist call (0 persists applied, 1 persist applied, ...).
    pub fn snapshot_after(&self, n: usize) -> Vec<u8> {
        let log = self.log.lock().unwrap();
        let len = unsafe { (*self.buf.get()).len() };
        let mut out = vec![0u8; len];
        for (offset, bytes) in log.iter().take(n) {
            out[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        out
    }
}

unsafe impl PmemOps for CrashSimPmem {
    fn base(&self) -> *mut u8 {
        unsafe { (*self.buf.get()).as_mut_ptr() }
    }

    fn len(&self) -> usize {
        unsafe { (*self.buf.get()).len() }
    }

    fn persist(&self, offset: usize, len: usize) {
        let bytes = unsafe { std::slice::from_raw_parts(self.base().add(offset), len) }.to_vec();
        self.log.lock().unwrap().push((offset, bytes));
    }
}

/// Given the persist-count bracket `[before, after)` of one lane commit
/// (`RedoLog::store`, which writes `n` entries, a checksum, and `nentries`,
/// then applies `n` entries and clears `nentries`), returns the persist
/// index right after `nentries` is durably set to the new count but before
/// any entry has been replayed by `process` — the single linearization
/// point a crash can land just past. `before + 1` lands inside the
/// pre-commit window instead, with at most one entry's bytes durable and no
/// terminating marker, the torn-log case.
pub fn commit_point(before: usize, after: usize) -> usize {
    let total = after - before;
    assert!(total >= 3 && total % 2 == 1, "not a single store+process bracket: {total}");
    let nentries = (total - 3) / 2;
    before + nentries + 2
}

pub fn torn_point(before: usize) -> usize {
    before + 1
}
