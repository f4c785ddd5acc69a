//! The façade (component C9): the public entry point most callers use
//! instead of reaching into [`alloc::heap`] directly.
//!
//! On top of [`Heap`]'s block-level `alloc`/`free`, this adds the
//! "construct with the allocation" pattern PMDK's `pmemobj_alloc` offers via
//! a constructor callback: here it's a slice of extra [`RedoEntry`] values
//! the caller supplies, which get folded into the very same commit that
//! reserves the block and writes its allocation header, so a crash can
//! never observe the block as allocated without whatever the caller needed
//! written alongside it.

use crate::alloc::block::{locate, MemoryBlock};
use crate::alloc::heap::Heap;
use crate::alloc::layout::{read_alloc_header, HeapConfig};
use crate::error::Result;
use crate::pmem::PmemOps;
use crate::redo::RedoEntry;
use tracing::instrument;

/// The user-facing allocator: a heap plus the offset-based API most callers
/// want (`usize` user offsets rather than [`MemoryBlock`]s).
pub struct PAlloc<'p, P: PmemOps> {
    heap: Heap<'p, P>,
}

impl<'p, P: PmemOps> PAlloc<'p, P> {
    pub fn create(pmem: &'p P, cfg: &HeapConfig) -> Result<Self> {
        Ok(PAlloc {
            heap: Heap::create(pmem, cfg)?,
        })
    }

    pub fn open(pmem: &'p P) -> Result<Self> {
        Ok(PAlloc { heap: Heap::open(pmem)? })
    }

    pub fn config(&self) -> &HeapConfig {
        self.heap.config()
    }

    /// Allocates `size` bytes and returns the offset of the first usable
    /// byte.
    #[instrument(skip(self))]
    pub fn alloc(&self, size: u64) -> Result<usize> {
        self.alloc_with(size, &[])
    }

    /// As [`PAlloc::alloc`], but `extra` is committed atomically alongside
    /// the allocation — e.g. a `RedoEntry::set` publishing the returned
    /// offset into some other persistent slot, so the pointer and the
    /// allocation it names always appear together after a crash.
    #[instrument(skip(self, extra))]
    pub fn alloc_with(&self, size: u64, extra: &[RedoEntry]) -> Result<usize> {
        let block = self.heap.alloc(size, extra)?;
        Ok(block.user_offset(self.heap.config()))
    }

    /// Frees the block at `user_off`, previously returned by `alloc`.
    #[instrument(skip(self))]
    pub fn free(&self, user_off: usize) {
        self.free_with(user_off, &[]);
    }

    /// As [`PAlloc::free`], but `extra` is committed atomically alongside
    /// the reclaim — typically a `RedoEntry::set` zeroing the caller's own
    /// persistent pointer slot, mirroring [`PAlloc::alloc_with`]'s
    /// composability for frees. Without this, a crash between the block
    /// being reclaimed and the caller separately zeroing its pointer would
    /// leave a live pointer to memory the allocator may now hand out again.
    #[instrument(skip(self, extra))]
    pub fn free_with(&self, user_off: usize, extra: &[RedoEntry]) {
        self.heap.free(self.locate(user_off), extra);
    }

    /// Attempts to resize the block at `user_off` to `new_size` without
    /// moving it. Returns whether it succeeded.
    #[instrument(skip(self))]
    pub fn realloc_in_place(&self, user_off: usize, new_size: u64) -> bool {
        self.heap.resize_in_place(self.locate(user_off), new_size)
    }

    /// Resizes the block at `user_off` to `new_size`, falling back to a
    /// fresh allocation, copy, and free of the old block when an in-place
    /// grow isn't possible. Returns the offset of the first usable byte,
    /// which may differ from `user_off` if the block moved.
    #[instrument(skip(self))]
    pub fn realloc(&self, user_off: usize, new_size: u64) -> Result<usize> {
        if self.realloc_in_place(user_off, new_size) {
            return Ok(user_off);
        }
        let old_usable = self.usable_size(user_off);
        let new_off = self.alloc(new_size)?;
        let copy_len = old_usable.min(new_size) as usize;
        let pmem = self.heap_pmem();
        unsafe {
            let src = pmem.slice(user_off, copy_len).as_ptr();
            pmem.memcpy_persist(new_off, src, copy_len);
        }
        self.free(user_off);
        Ok(new_off)
    }

    /// Installs a run size class covering `size` if none of the existing
    /// classes already does within an acceptable waste ratio. See
    /// [`crate::alloc::heap::Heap::register_alloc_class`] for the
    /// header-inclusive sizing and concurrency caveats.
    pub fn register_alloc_class(&self, size: u64) -> usize {
        self.heap.register_alloc_class(size)
    }

    /// Bytes available to the caller at `user_off`.
    pub fn usable_size(&self, user_off: usize) -> u64 {
        self.locate(user_off).usable_size(self.heap.config())
    }

    fn locate(&self, user_off: usize) -> MemoryBlock {
        let hdr = read_alloc_header(self.heap_pmem(), user_off);
        locate(self.heap_pmem(), self.heap.config(), hdr.zone_id, hdr.chunk_id, user_off)
    }

    fn heap_pmem(&self) -> &P {
        self.heap.pmem_ref()
    }

    /// Offset of the first live allocation in ground-truth order, or `None`
    /// if the heap holds nothing.
    pub fn first(&self) -> Option<usize> {
        self.heap.first()
    }

    /// Offset of the next live allocation after `prev`, or `None` once
    /// iteration is exhausted.
    pub fn next(&self, prev: usize) -> Option<usize> {
        self.heap.next(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmem::test_util::VecPmem;

    fn small_cfg() -> HeapConfig {
        HeapConfig {
            chunksize: 4096,
            chunks_per_zone: 16,
            zone_min_size: 4096 * 4,
            num_lanes: 2,
        }
    }

    #[test]
    fn alloc_free_realloc_roundtrip() {
        let pmem = VecPmem::new(4 * 1024 * 1024);
        let cfg = small_cfg();
        let palloc = PAlloc::create(&pmem, &cfg).unwrap();

        let off = palloc.alloc(64).unwrap();
        assert!(palloc.usable_size(off) >= 64);
        assert!(palloc.realloc_in_place(off, 32));
        palloc.free(off);
    }

    #[test]
    fn alloc_with_publishes_extra_entry_atomically() {
        let pmem = VecPmem::new(4 * 1024 * 1024);
        let cfg = small_cfg();
        let palloc = PAlloc::create(&pmem, &cfg).unwrap();

        // A small standalone slot, standing in for some field of a caller's
        // own persistent struct that a constructor would update alongside
        // the allocation it describes (e.g. a generation counter, or a
        // link to a sibling node already known before the call).
        let counter_off = palloc.alloc(8).unwrap();
        unsafe {
            pmem.write_persist::<u64>(counter_off, 41);
        }

        let entry = RedoEntry::set(counter_off, 42);
        let off = palloc.alloc_with(64, &[entry]).unwrap();
        assert_ne!(off, counter_off);
        assert_eq!(unsafe { pmem.read::<u64>(counter_off) }, 42);
    }

    #[test]
    fn free_with_zeroes_callers_pointer_slot_atomically() {
        let pmem = VecPmem::new(4 * 1024 * 1024);
        let cfg = small_cfg();
        let palloc = PAlloc::create(&pmem, &cfg).unwrap();

        let root_off = palloc.alloc(8).unwrap();
        let target = palloc.alloc(64).unwrap();
        unsafe {
            pmem.write_persist::<u64>(root_off, target as u64);
        }

        palloc.free_with(target, &[RedoEntry::set(root_off, 0)]);
        assert_eq!(unsafe { pmem.read::<u64>(root_off) }, 0);
    }

    #[test]
    fn realloc_moves_when_in_place_grow_fails() {
        let pmem = VecPmem::new(4 * 1024 * 1024);
        let cfg = small_cfg();
        let palloc = PAlloc::create(&pmem, &cfg).unwrap();

        let a = palloc.alloc(3000).unwrap();
        let _b = palloc.alloc(3000).unwrap();
        let _c = palloc.alloc(3000).unwrap();
        unsafe {
            pmem.memset_persist(a, 0xab, 3000);
        }

        // `a`'s neighbor (`b`) isn't free, so the in-place grow this would
        // need fails and `realloc` must move the block instead.
        assert!(!palloc.realloc_in_place(a, 20_000));
        let moved = palloc.realloc(a, 20_000).unwrap();
        assert_ne!(moved, a);
        assert!(palloc.usable_size(moved) >= 20_000);
        unsafe {
            assert_eq!(pmem.slice(moved, 3000), &[0xabu8; 3000][..]);
        }
    }

    #[test]
    fn iteration_matches_alloc_order_membership() {
        let pmem = VecPmem::new(4 * 1024 * 1024);
        let cfg = small_cfg();
        let palloc = PAlloc::create(&pmem, &cfg).unwrap();
        let a = palloc.alloc(32).unwrap();
        let b = palloc.alloc(3000).unwrap();

        let mut seen = Vec::new();
        let mut cur = palloc.first();
        while let Some(off) = cur {
            seen.push(off);
            cur = palloc.next(off);
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&a));
        assert!(seen.contains(&b));
    }
}
