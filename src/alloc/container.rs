//! The volatile free-space index (component C4).
//!
//! Every bucket keeps an in-memory index of the free blocks the persistent
//! chunk-header chain / run bitmaps already describe. The index exists so
//! that finding a best-fit block is O(log n) instead of a chain walk; it
//! must never be the thing recovery trusts (see [`crate::alloc::heap`],
//! which only ever rebuilds it from persistent ground truth).
//!
//! An entry is `(size_idx, zone_id, chunk_id, block_off)`. Ordering by that
//! tuple gives best-fit with a deterministic tie-break for free: the
//! smallest satisfying size wins, and among equal sizes the lowest
//! `(zone_id, chunk_id, block_off)` wins.

use std::collections::BTreeSet;

pub type Entry = (u32, u32, u32, u32);

/// A volatile index of free blocks within one bucket.
pub trait BlockContainer: Default {
    fn insert(&mut self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32);
    fn remove(&mut self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32) -> bool;
    /// Removes and returns the smallest entry whose `size_idx >= min_size_idx`,
    /// tie-broken by the lowest `(zone_id, chunk_id, block_off)`.
    fn take_best_fit(&mut self, min_size_idx: u32) -> Option<Entry>;
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
}

/// `BTreeSet`-backed container for the huge bucket, where `size_idx` varies
/// widely across entries and a tree's O(log n) range query matters.
#[derive(Debug, Default)]
pub struct TreeContainer {
    entries: BTreeSet<Entry>,
}

impl BlockContainer for TreeContainer {
    fn insert(&mut self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32) {
        self.entries.insert((size_idx, zone_id, chunk_id, block_off));
    }

    fn remove(&mut self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32) -> bool {
        self.entries.remove(&(size_idx, zone_id, chunk_id, block_off))
    }

    fn take_best_fit(&mut self, min_size_idx: u32) -> Option<Entry> {
        let found = *self.entries.range((min_size_idx, 0, 0, 0)..).next()?;
        self.entries.remove(&found);
        Some(found)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Sorted-`Vec`-backed container for run buckets, where every entry shares
/// the same `size_idx` (one bitmap unit) and counts per bucket stay small.
#[derive(Debug, Default)]
pub struct ListContainer {
    entries: Vec<Entry>,
}

impl BlockContainer for ListContainer {
    fn insert(&mut self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32) {
        let e = (size_idx, zone_id, chunk_id, block_off);
        let idx = self.entries.partition_point(|x| *x < e);
        self.entries.insert(idx, e);
    }

    fn remove(&mut self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32) -> bool {
        let e = (size_idx, zone_id, chunk_id, block_off);
        if let Ok(idx) = self.entries.binary_search(&e) {
            self.entries.remove(idx);
            true
        } else {
            false
        }
    }

    fn take_best_fit(&mut self, min_size_idx: u32) -> Option<Entry> {
        let idx = self.entries.partition_point(|x| x.0 < min_size_idx);
        if idx < self.entries.len() {
            Some(self.entries.remove(idx))
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_best_fit_tie_break() {
        let mut c = TreeContainer::default();
        c.insert(2, 0, 0, 4);
        c.insert(1, 0, 0, 4);
        c.insert(1, 5, 0, 8);
        // Two entries satisfy a request for size_idx >= 4: zone 1 and zone 2.
        // The lower zone_id must win.
        let got = c.take_best_fit(4).unwrap();
        assert_eq!(got, (4, 1, 0, 0));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn tree_prefers_smaller_size_over_lower_zone() {
        let mut c = TreeContainer::default();
        c.insert(5, 0, 0, 16); // zone 0, size 16
        c.insert(1, 0, 0, 4); // zone 1, size 4
        let got = c.take_best_fit(4).unwrap();
        assert_eq!(got, (4, 1, 0, 0));
    }

    #[test]
    fn list_fifo_ish_best_fit() {
        let mut c = ListContainer::default();
        c.insert(0, 3, 2, 1);
        c.insert(0, 1, 0, 1);
        c.insert(0, 1, 5, 1);
        let got = c.take_best_fit(1).unwrap();
        assert_eq!(got, (1, 0, 1, 0));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn remove_missing_is_false() {
        let mut c = ListContainer::default();
        assert!(!c.remove(0, 0, 0, 1));
        c.insert(0, 0, 0, 1);
        assert!(c.remove(0, 0, 0, 1));
        assert!(!c.remove(0, 0, 0, 1));
    }
}
