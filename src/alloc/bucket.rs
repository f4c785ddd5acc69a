//! Size classes and the buckets that index their free blocks (component
//! C5). One [`Bucket`] owns a lock and a [`BlockContainer`]; the lock order
//! `bucket -> run -> lane` (see [`crate::lane`]) is fixed across the crate
//! to avoid deadlock between concurrent allocators.

use super::container::{BlockContainer, Entry, ListContainer, TreeContainer};
use super::layout::HeapConfig;
use parking_lot::{Mutex, RwLock};

/// What a bucket hands out: whole chunks, or fixed-size slots of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    Huge,
    Run { unit_size: u64, nallocs: u32 },
}

/// A size class: its free-block index plus the lock guarding it.
pub struct Bucket<C: BlockContainer> {
    kind: BucketKind,
    container: Mutex<C>,
}

impl<C: BlockContainer> Bucket<C> {
    pub fn new(kind: BucketKind) -> Self {
        Bucket {
            kind,
            container: Mutex::new(C::default()),
        }
    }

    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    pub fn is_small(&self) -> bool {
        matches!(self.kind, BucketKind::Run { .. })
    }

    pub fn insert_block(&self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32) {
        self.container.lock().insert(zone_id, chunk_id, block_off, size_idx);
    }

    pub fn remove_block(&self, zone_id: u32, chunk_id: u32, block_off: u32, size_idx: u32) -> bool {
        self.container.lock().remove(zone_id, chunk_id, block_off, size_idx)
    }

    pub fn take_best_fit(&self, min_size_idx: u32) -> Option<Entry> {
        self.container.lock().take_best_fit(min_size_idx)
    }

    pub fn is_empty(&self) -> bool {
        self.container.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.container.lock().len()
    }
}

/// How many chunk-granular or bitmap-granular units a request of
/// `size_with_header` bytes needs from a bucket of this kind. `None` means
/// the request does not fit this bucket at all (too big for a run's unit
/// size).
pub fn calc_units(kind: BucketKind, size_with_header: u64, cfg: &HeapConfig) -> Option<u32> {
    match kind {
        BucketKind::Huge => Some(size_with_header.div_ceil(cfg.chunksize) as u32),
        BucketKind::Run { unit_size, .. } => {
            if size_with_header <= unit_size {
                Some(1)
            } else {
                None
            }
        }
    }
}

/// Generates the run size classes for a heap, a geometric progression
/// (full and half steps, as libpmemobj's default allocation classes do)
/// bounded above by a quarter of a chunk: beyond that a run wastes more
/// space on its header and bitmap than splitting a chunk would.
pub fn default_alloc_classes(cfg: &HeapConfig) -> Vec<u64> {
    let max_unit = cfg.chunksize / 4;
    let mut sizes = Vec::new();
    let mut step = 32u64;
    while step <= max_unit {
        sizes.push(step);
        let half_step = step + step / 2;
        if half_step < step * 2 && half_step <= max_unit {
            sizes.push(half_step);
        }
        step *= 2;
    }
    sizes.sort_unstable();
    sizes.dedup();
    sizes
}

/// All buckets for one heap: the huge bucket plus one run bucket per size
/// class, ascending by unit size. `runs` is an `RwLock` rather than a plain
/// `Vec` because [`BucketRegistry::register_alloc_class`] can grow it after
/// the heap is already open.
pub struct BucketRegistry {
    pub huge: Bucket<TreeContainer>,
    pub runs: RwLock<Vec<Bucket<ListContainer>>>,
}

/// Maximum fraction of a registered class's unit size that may go to waste
/// before a distinct class is worth installing, matching the spacing
/// `default_alloc_classes` already uses between its own steps.
const MAX_WASTE_NUM: u64 = 1;
const MAX_WASTE_DEN: u64 = 4;

impl BucketRegistry {
    pub fn new(cfg: &HeapConfig) -> Self {
        let runs = default_alloc_classes(cfg)
            .into_iter()
            .map(|unit_size| {
                Bucket::new(BucketKind::Run {
                    unit_size,
                    nallocs: cfg.run_nallocs(unit_size),
                })
            })
            .collect();
        BucketRegistry {
            huge: Bucket::new(BucketKind::Huge),
            runs: RwLock::new(runs),
        }
    }

    /// Index of the smallest run bucket able to satisfy `size_with_header`,
    /// or `None` if only the huge bucket can (the request needs more than a
    /// quarter chunk, or no run class happens to fit it).
    pub fn class_for(&self, size_with_header: u64) -> Option<usize> {
        self.runs.read().iter().position(|b| match b.kind() {
            BucketKind::Run { unit_size, .. } => size_with_header <= unit_size,
            BucketKind::Huge => false,
        })
    }

    pub fn runs_len(&self) -> usize {
        self.runs.read().len()
    }

    /// Installs a run class covering `size` if no existing class already
    /// does so within the waste ratio, returning the (possibly pre-existing)
    /// class's index either way. Classes stay sorted ascending by unit size
    /// so `class_for`'s smallest-fit scan keeps working, which means an
    /// insertion shifts the index of every larger class — callers must not
    /// hold a class index across a call to this method.
    pub fn register_alloc_class(&self, size: u64, cfg: &HeapConfig) -> usize {
        let covers = |unit_size: u64| size <= unit_size && (unit_size - size) * MAX_WASTE_DEN <= size * MAX_WASTE_NUM;
        if let Some(idx) = self.runs.read().iter().position(|b| matches!(b.kind(), BucketKind::Run { unit_size, .. } if covers(unit_size))) {
            return idx;
        }
        let mut runs = self.runs.write();
        if let Some(idx) = runs.iter().position(|b| matches!(b.kind(), BucketKind::Run { unit_size, .. } if covers(unit_size))) {
            return idx;
        }
        let pos = runs.partition_point(|b| match b.kind() {
            BucketKind::Run { unit_size, .. } => unit_size < size,
            BucketKind::Huge => true,
        });
        runs.insert(
            pos,
            Bucket::new(BucketKind::Run {
                unit_size: size,
                nallocs: cfg.run_nallocs(size),
            }),
        );
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_classes_are_sorted_and_bounded() {
        let cfg = HeapConfig {
            chunksize: 4096,
            chunks_per_zone: 16,
            zone_min_size: 4096 * 4,
            num_lanes: 1,
        };
        let classes = default_alloc_classes(&cfg);
        assert!(classes.windows(2).all(|w| w[0] < w[1]));
        assert!(*classes.last().unwrap() <= cfg.chunksize / 4);
        assert!(classes.contains(&32));
    }

    #[test]
    fn registry_picks_smallest_fitting_class() {
        let cfg = HeapConfig {
            chunksize: 4096,
            chunks_per_zone: 16,
            zone_min_size: 4096 * 4,
            num_lanes: 1,
        };
        let reg = BucketRegistry::new(&cfg);
        let idx = reg.class_for(40).unwrap();
        let BucketKind::Run { unit_size, .. } = reg.runs.read()[idx].kind() else {
            panic!("expected run bucket");
        };
        assert!(unit_size >= 40);
        if idx > 0 {
            let BucketKind::Run { unit_size: smaller, .. } = reg.runs.read()[idx - 1].kind() else {
                panic!("expected run bucket");
            };
            assert!(smaller < 40);
        }
    }

    #[test]
    fn register_alloc_class_installs_a_new_class_when_none_is_close_enough() {
        let cfg = HeapConfig {
            chunksize: 4096,
            chunks_per_zone: 16,
            zone_min_size: 4096 * 4,
            num_lanes: 1,
        };
        let reg = BucketRegistry::new(&cfg);
        let before = reg.runs_len();
        let idx = reg.register_alloc_class(100, &cfg);
        assert_eq!(reg.runs_len(), before + 1);
        let BucketKind::Run { unit_size, .. } = reg.runs.read()[idx].kind() else {
            panic!("expected run bucket");
        };
        assert_eq!(unit_size, 100);
        // Registering again for a size already covered is a no-op.
        let idx2 = reg.register_alloc_class(100, &cfg);
        assert_eq!(reg.runs_len(), before + 1);
        assert_eq!(idx, idx2);
    }

    #[test]
    fn huge_request_falls_through_to_none() {
        let cfg = HeapConfig {
            chunksize: 4096,
            chunks_per_zone: 16,
            zone_min_size: 4096 * 4,
            num_lanes: 1,
        };
        let reg = BucketRegistry::new(&cfg);
        assert_eq!(reg.class_for(100_000), None);
    }

    #[test]
    fn bucket_insert_and_take() {
        let b: Bucket<ListContainer> = Bucket::new(BucketKind::Run {
            unit_size: 64,
            nallocs: 10,
        });
        b.insert_block(0, 1, 2, 1);
        assert_eq!(b.len(), 1);
        let got = b.take_best_fit(1).unwrap();
        assert_eq!(got, (1, 0, 1, 2));
        assert!(b.is_empty());
    }
}
