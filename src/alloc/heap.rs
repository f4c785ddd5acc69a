//! The heap engine (component C8): maps a requested size to a bucket,
//! finds/reserves/splits/coalesces blocks against persistent ground truth,
//! activates zones on demand, and creates or degrades runs.
//!
//! Every mutation that touches persistent metadata goes through exactly one
//! lane commit (component C7): the chunk-header/run-header/bitmap changes
//! for a single `alloc`/`free`/`resize_in_place` call are collected into one
//! `Vec<RedoEntry>` and applied atomically. The volatile containers
//! (component C4) are updated only after that commit succeeds, and only
//! ever mirror what the persistent chain already says — they are never
//! consulted during recovery.

use super::block::MemoryBlock;
use super::bucket::{calc_units, BucketKind, BucketRegistry};
use super::layout::*;
use crate::error::{PmError, Result};
use crate::lane::LanePool;
use crate::pmem::PmemOps;
use crate::redo::RedoEntry;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

const RUN_LOCK_SHARDS: usize = 64;

fn run_lock_shard(zone_id: u32, chunk_id: u32) -> usize {
    (zone_id as usize)
        .wrapping_mul(2654435761)
        .wrapping_add(chunk_id as usize)
        % RUN_LOCK_SHARDS
}

/// A live heap bound to one `PmemOps` region: the engine plus its buckets
/// and lanes.
pub struct Heap<'p, P: PmemOps> {
    pmem: &'p P,
    cfg: HeapConfig,
    max_zone: u32,
    buckets: BucketRegistry,
    run_locks: Vec<Mutex<()>>,
    lanes: LanePool,
    active_zones: Mutex<Vec<bool>>,
}

impl<'p, P: PmemOps> Heap<'p, P> {
    /// Initializes a fresh heap over `pmem` and opens it.
    #[instrument(skip(pmem, cfg))]
    pub fn create(pmem: &'p P, cfg: &HeapConfig) -> Result<Self> {
        heap_init(pmem, cfg)?;
        Self::open(pmem)
    }

    /// Opens an existing heap: validates it, replays any pending lane
    /// commits, and repopulates the volatile free-space index from
    /// persistent ground truth (`heap_boot`).
    #[instrument(skip(pmem))]
    pub fn open(pmem: &'p P) -> Result<Self> {
        heap_check(pmem)?;
        let hdr_cfg = heap_config_from_header(pmem);
        let lanes = LanePool::new(&hdr_cfg);
        lanes.recover(pmem);

        let max_zone = heap_max_zone(pmem.len() as u64, &hdr_cfg);
        let buckets = BucketRegistry::new(&hdr_cfg);
        let run_locks = (0..RUN_LOCK_SHARDS).map(|_| Mutex::new(())).collect();
        let active_zones = Mutex::new(vec![false; max_zone as usize]);

        let heap = Heap {
            pmem,
            cfg: hdr_cfg,
            max_zone,
            buckets,
            run_locks,
            lanes,
            active_zones,
        };
        heap.populate_buckets();
        Ok(heap)
    }

    pub fn config(&self) -> &HeapConfig {
        &self.cfg
    }

    /// Installs a run class that covers `size` if none of the existing
    /// classes already does, within an acceptable waste ratio. `size` is
    /// header-inclusive, the same quantity `alloc` compares a request's
    /// unit size against — not the caller's raw payload size. Intended for
    /// heap setup: registering classes concurrently with in-flight
    /// `alloc`/`free` calls that hold a bucket index across this call can
    /// observe a stale index, since inserting a class shifts every larger
    /// one's position.
    pub fn register_alloc_class(&self, size: u64) -> usize {
        self.buckets.register_alloc_class(size, &self.cfg)
    }

    /// The underlying `PmemOps` region, for callers (the façade) that need
    /// to read bytes the engine itself doesn't expose an accessor for.
    pub fn pmem_ref(&self) -> &'p P {
        self.pmem
    }

    fn zone_size_idx(&self, zone_id: u32) -> u32 {
        zone_size_idx(zone_id, self.max_zone, self.pmem.len() as u64, &self.cfg)
    }

    /// Walks every activated zone's chunk chain and every run's bitmap,
    /// rebuilding the volatile containers. Called once at open time; never
    /// trusted as ground truth itself.
    fn populate_buckets(&self) {
        for zone_id in 0..self.max_zone {
            let zh = read_zone_header(self.pmem, zone_id, &self.cfg);
            if zh.magic != ZONE_HEADER_MAGIC {
                continue;
            }
            self.active_zones.lock()[zone_id as usize] = true;
            let mut chunk_id = 0u32;
            while chunk_id < zh.size_idx {
                let hdr = read_chunk_header(self.pmem, zone_id, chunk_id, &self.cfg);
                match hdr.chunk_type() {
                    Some(ChunkType::Free) => {
                        self.buckets.huge.insert_block(zone_id, chunk_id, 0, hdr.size_idx());
                    }
                    Some(ChunkType::Run) => {
                        let run_hdr = read_run_header(self.pmem, zone_id, chunk_id, &self.cfg);
                        if let Some(idx) = self.buckets.class_for(run_hdr.block_size) {
                            let nallocs = self.cfg.run_nallocs(run_hdr.block_size);
                            for i in 0..nallocs {
                                if !self.run_bit_is_set(zone_id, chunk_id, i) {
                                    self.buckets.runs.read()[idx].insert_block(zone_id, chunk_id, i, 1);
                                }
                            }
                        }
                    }
                    _ => {}
                }
                chunk_id += hdr.size_idx().max(1);
            }
        }
    }

    fn run_bit_is_set(&self, zone_id: u32, chunk_id: u32, bit: u32) -> bool {
        let word = read_bitmap_word(self.pmem, zone_id, chunk_id, &self.cfg, (bit / 64) as usize);
        (word >> (bit % 64)) & 1 != 0
    }

    /// Allocates `size` bytes, returning the located block. A request too
    /// big for the whole pool is not distinguished from one that merely
    /// finds the pool full right now: both exhaust every zone's huge bucket
    /// and surface [`PmError::OutOfMemory`]. [`PmError::TooLarge`] is
    /// reserved for a run class whose configured span the request exceeds.
    ///
    /// `extra` is folded into the same commit that reserves the block and
    /// writes its allocation header — the hook a caller uses to publish an
    /// out-pointer or initialize fields atomically with the allocation
    /// itself (see [`crate::palloc`]).
    #[instrument(skip(self, extra))]
    pub fn alloc(&self, size: u64, extra: &[RedoEntry]) -> Result<MemoryBlock> {
        let needed = size + ALLOC_HEADER_SIZE as u64;

        if let Some(idx) = self.buckets.class_for(needed) {
            if let Some(block) = self.alloc_from_run_class(idx, size, extra) {
                return Ok(block);
            }
            // Peer fallback: the next larger class may have spare units.
            if let Some(block) = self.alloc_from_peer_class(idx, size, extra) {
                return Ok(block);
            }
            return self.alloc_new_run(idx, size, extra);
        }

        self.alloc_huge(calc_units(BucketKind::Huge, needed, &self.cfg).ok_or(PmError::TooLarge)?, size, extra)
    }

    fn alloc_header_entry(&self, block: MemoryBlock, size: u64) -> RedoEntry {
        let hdr = AllocationHeader {
            // The real reserved size, including the header itself — not
            // the caller's requested `size`. `usable_size` never reads
            // this field back (it recomputes from block geometry), but the
            // on-media value must still mean what the layout says it does.
            size: size + ALLOC_HEADER_SIZE as u64,
            chunk_id: block.chunk_id(),
            zone_id: block.zone_id(),
        };
        RedoEntry::buf_set(block.header_offset(&self.cfg), &hdr.to_bytes())
    }

    fn alloc_from_run_class(&self, idx: usize, size: u64, extra: &[RedoEntry]) -> Option<MemoryBlock> {
        let (zone_id, chunk_id, block_off, unit_size) = {
            let runs = self.buckets.runs.read();
            let bucket = &runs[idx];
            let (_, zone_id, chunk_id, block_off) = bucket.take_best_fit(1)?;
            let BucketKind::Run { unit_size, .. } = bucket.kind() else {
                unreachable!("run bucket index must hold a Run kind")
            };
            (zone_id, chunk_id, block_off, unit_size)
        };
        let block = MemoryBlock::Run {
            zone_id,
            chunk_id,
            block_off,
            unit_size,
        };
        self.mark_run_bit(zone_id, chunk_id, block_off, size, block, extra);
        Some(block)
    }

    fn alloc_from_peer_class(&self, idx: usize, size: u64, extra: &[RedoEntry]) -> Option<MemoryBlock> {
        let peer = idx + 1;
        if peer >= self.buckets.runs_len() {
            return None;
        }
        self.alloc_from_run_class(peer, size, extra)
    }

    fn alloc_new_run(&self, idx: usize, size: u64, extra: &[RedoEntry]) -> Result<MemoryBlock> {
        let BucketKind::Run { unit_size, nallocs } = self.buckets.runs.read()[idx].kind() else {
            unreachable!()
        };
        let (zone_id, chunk_id) = self.reserve_huge_chunks(1)?;
        debug!(zone_id, chunk_id, unit_size, "creating run");

        let _shard = self.run_locks[run_lock_shard(zone_id, chunk_id)].lock();
        let mut entries = vec![RedoEntry::set(
            chunk_header_offset(zone_id, chunk_id, &self.cfg),
            ChunkHeader::new(ChunkType::Run, 0, 1).to_bits(),
        )];
        let run_hdr = RunHeader {
            block_size: unit_size,
            bitmap_nval: nallocs,
            bitmap_lastval: 0,
        };
        entries.push(RedoEntry::buf_set(
            run_header_offset(zone_id, chunk_id, &self.cfg),
            &run_hdr.to_bytes(),
        ));
        entries.push(RedoEntry::set(
            run_bitmap_offset(zone_id, chunk_id, &self.cfg),
            1, // reserve block_off 0 for the caller immediately
        ));
        let block = MemoryBlock::Run {
            zone_id,
            chunk_id,
            block_off: 0,
            unit_size,
        };
        entries.push(self.alloc_header_entry(block, size));
        entries.extend_from_slice(extra);
        self.lanes.hold().commit(self.pmem, &entries);

        for i in 1..nallocs {
            self.buckets.runs.read()[idx].insert_block(zone_id, chunk_id, i, 1);
        }

        Ok(block)
    }

    #[allow(clippy::too_many_arguments)]
    fn mark_run_bit(&self, zone_id: u32, chunk_id: u32, bit: u32, size: u64, block: MemoryBlock, extra: &[RedoEntry]) {
        let _shard = self.run_locks[run_lock_shard(zone_id, chunk_id)].lock();
        let off = run_bitmap_offset(zone_id, chunk_id, &self.cfg) + (bit / 64) as usize * 8;
        let mask = 1u64 << (bit % 64);
        let mut entries = vec![RedoEntry::or(off, mask), self.alloc_header_entry(block, size)];
        entries.extend_from_slice(extra);
        self.lanes.hold().commit(self.pmem, &entries);
    }

    fn free_run_bit(&self, zone_id: u32, chunk_id: u32, bit: u32, extra: &[RedoEntry]) {
        let _shard = self.run_locks[run_lock_shard(zone_id, chunk_id)].lock();
        let off = run_bitmap_offset(zone_id, chunk_id, &self.cfg) + (bit / 64) as usize * 8;
        let mask = 1u64 << (bit % 64);
        let mut entries = vec![RedoEntry::and(off, !mask)];
        entries.extend_from_slice(extra);
        self.lanes.hold().commit(self.pmem, &entries);
    }

    fn alloc_huge(&self, units: u32, size: u64, extra: &[RedoEntry]) -> Result<MemoryBlock> {
        loop {
            if let Some((size_idx, zone_id, chunk_id, _)) = self.buckets.huge.take_best_fit(units) {
                return Ok(self.split_huge(zone_id, chunk_id, size_idx, units, Some((size, extra))));
            }
            if !self.activate_next_zone() {
                return Err(PmError::OutOfMemory);
            }
        }
    }

    /// Splits (or fully claims) a free chunk run into a `Used` chunk of
    /// `units` chunks plus a trailing free remainder. When `header` is
    /// `Some((size, extra))`, the allocation header and any caller-supplied
    /// entries are folded into the same commit — used for a user-visible
    /// allocation; `None` is used for internal reservations (run creation)
    /// that have no allocation header of their own.
    fn split_huge(&self, zone_id: u32, chunk_id: u32, size_idx: u32, units: u32, header: Option<(u64, &[RedoEntry])>) -> MemoryBlock {
        let block = MemoryBlock::Huge {
            zone_id,
            chunk_id,
            size_idx: units,
        };
        let mut entries = vec![RedoEntry::set(
            chunk_header_offset(zone_id, chunk_id, &self.cfg),
            ChunkHeader::new(ChunkType::Used, 0, units).to_bits(),
        )];
        if units < size_idx {
            let remainder = size_idx - units;
            entries.push(RedoEntry::set(
                chunk_header_offset(zone_id, chunk_id + units, &self.cfg),
                ChunkHeader::new(ChunkType::Free, 0, remainder).to_bits(),
            ));
        }
        if let Some((size, extra)) = header {
            entries.push(self.alloc_header_entry(block, size));
            entries.extend_from_slice(extra);
        }
        self.lanes.hold().commit(self.pmem, &entries);
        if units < size_idx {
            self.buckets
                .huge
                .insert_block(zone_id, chunk_id + units, 0, size_idx - units);
        }
        block
    }

    /// Reserves `units` whole chunks for internal use (run creation),
    /// splitting a larger free chunk or activating a new zone as needed.
    fn reserve_huge_chunks(&self, units: u32) -> Result<(u32, u32)> {
        loop {
            if let Some((size_idx, zone_id, chunk_id, _)) = self.buckets.huge.take_best_fit(units) {
                let block = self.split_huge(zone_id, chunk_id, size_idx, units, None);
                return Ok((block.zone_id(), block.chunk_id()));
            }
            if !self.activate_next_zone() {
                return Err(PmError::OutOfMemory);
            }
        }
    }

    fn activate_next_zone(&self) -> bool {
        let mut active = self.active_zones.lock();
        let Some(zone_id) = active.iter().position(|&a| !a) else {
            return false;
        };
        heap_zone_init(self.pmem, zone_id as u32, self.max_zone, self.pmem.len() as u64, &self.cfg);
        active[zone_id] = true;
        let size_idx = self.zone_size_idx(zone_id as u32);
        debug!(zone_id, size_idx, "activated zone");
        self.buckets.huge.insert_block(zone_id as u32, 0, 0, size_idx);
        true
    }

    /// Frees a previously allocated block, coalescing and run-degrading as
    /// ground truth allows. `extra` is committed atomically alongside the
    /// bitmap/chunk-header write that reclaims the block — the hook a
    /// caller uses to zero its own persistent pointer to this block in the
    /// same commit (see [`crate::palloc::PAlloc::free_with`]), so a crash
    /// can never observe a live pointer to an already-reclaimed block.
    #[instrument(skip(self, extra))]
    pub fn free(&self, block: MemoryBlock, extra: &[RedoEntry]) {
        match block {
            MemoryBlock::Run {
                zone_id,
                chunk_id,
                block_off,
                unit_size,
            } => self.free_run_block(zone_id, chunk_id, block_off, unit_size, extra),
            MemoryBlock::Huge { zone_id, chunk_id, size_idx } => self.free_huge(zone_id, chunk_id, size_idx, extra),
        }
    }

    fn free_run_block(&self, zone_id: u32, chunk_id: u32, block_off: u32, unit_size: u64, extra: &[RedoEntry]) {
        self.free_run_bit(zone_id, chunk_id, block_off, extra);
        // A run's `block_size` always comes from a class that created it;
        // failing to map back to one here means ground truth disagrees with
        // the bucket registry — an already-corrupted heap, not a
        // recoverable condition.
        let idx = self
            .buckets
            .class_for(unit_size)
            .unwrap_or_else(|| panic!("run block_size {unit_size} matches no bucket class"));
        self.buckets.runs.read()[idx].insert_block(zone_id, chunk_id, block_off, 1);

        let run_hdr = read_run_header(self.pmem, zone_id, chunk_id, &self.cfg);
        let nallocs = self.cfg.run_nallocs(run_hdr.block_size);
        let fully_free = (0..nallocs).all(|i| !self.run_bit_is_set(zone_id, chunk_id, i));
        if fully_free {
            self.degrade_run(zone_id, chunk_id, idx, nallocs);
        }
    }

    fn degrade_run(&self, zone_id: u32, chunk_id: u32, class_idx: usize, nallocs: u32) {
        debug!(zone_id, chunk_id, "degrading run back to a free chunk");
        let runs = self.buckets.runs.read();
        for i in 0..nallocs {
            runs[class_idx].remove_block(zone_id, chunk_id, i, 1);
        }
        drop(runs);
        self.free_huge(zone_id, chunk_id, 1, &[]);
    }

    fn free_huge(&self, zone_id: u32, chunk_id: u32, size_idx: u32, extra: &[RedoEntry]) {
        let zone_size_idx = self.zone_size_idx(zone_id);
        let mut start = chunk_id;
        let mut merged = size_idx;

        if let Some((next_id, next_size)) = self.adjacent_following_free(zone_id, start, merged, zone_size_idx) {
            self.buckets.huge.remove_block(zone_id, next_id, 0, next_size);
            merged += next_size;
        }
        if let Some((prev_id, prev_size)) = self.adjacent_preceding_free(zone_id, start) {
            self.buckets.huge.remove_block(zone_id, prev_id, 0, prev_size);
            start = prev_id;
            merged += prev_size;
        }

        let mut entries = vec![RedoEntry::set(
            chunk_header_offset(zone_id, start, &self.cfg),
            ChunkHeader::new(ChunkType::Free, 0, merged).to_bits(),
        )];
        entries.extend_from_slice(extra);
        self.lanes.hold().commit(self.pmem, &entries);
        self.buckets.huge.insert_block(zone_id, start, 0, merged);
    }

    fn adjacent_following_free(&self, zone_id: u32, chunk_id: u32, size_idx: u32, zone_size_idx: u32) -> Option<(u32, u32)> {
        let next = chunk_id + size_idx;
        if next >= zone_size_idx {
            return None;
        }
        let hdr = read_chunk_header(self.pmem, zone_id, next, &self.cfg);
        (hdr.chunk_type() == Some(ChunkType::Free)).then_some((next, hdr.size_idx()))
    }

    fn adjacent_preceding_free(&self, zone_id: u32, chunk_id: u32) -> Option<(u32, u32)> {
        let mut cursor = 0u32;
        while cursor < chunk_id {
            let hdr = read_chunk_header(self.pmem, zone_id, cursor, &self.cfg);
            let step = hdr.size_idx().max(1);
            if cursor + step == chunk_id && hdr.chunk_type() == Some(ChunkType::Free) {
                return Some((cursor, hdr.size_idx()));
            }
            cursor += step;
        }
        None
    }

    /// Attempts to satisfy a `realloc` to `new_size` without moving the
    /// block. Huge blocks grow by absorbing a following free chunk; run
    /// blocks only succeed if `new_size` still fits the same unit. Returns
    /// `true` if the block now has `new_size` usable bytes.
    pub fn resize_in_place(&self, block: MemoryBlock, new_size: u64) -> bool {
        let needed = new_size + ALLOC_HEADER_SIZE as u64;
        match block {
            MemoryBlock::Run { unit_size, .. } => needed <= unit_size,
            MemoryBlock::Huge { zone_id, chunk_id, size_idx } => {
                if needed <= size_idx as u64 * self.cfg.chunksize {
                    return true;
                }
                let zone_size_idx = self.zone_size_idx(zone_id);
                let Some((next_id, next_size)) =
                    self.adjacent_following_free(zone_id, chunk_id, size_idx, zone_size_idx)
                else {
                    return false;
                };
                let grown = size_idx + next_size;
                if (grown as u64) * self.cfg.chunksize < needed {
                    return false;
                }
                self.buckets.huge.remove_block(zone_id, next_id, 0, next_size);
                let grown_block = MemoryBlock::Huge {
                    zone_id,
                    chunk_id,
                    size_idx: grown,
                };
                self.lanes.hold().commit(
                    self.pmem,
                    &[
                        RedoEntry::set(
                            chunk_header_offset(zone_id, chunk_id, &self.cfg),
                            ChunkHeader::new(ChunkType::Used, 0, grown).to_bits(),
                        ),
                        self.alloc_header_entry(grown_block, new_size),
                    ],
                );
                true
            }
        }
    }

    /// Walks the heap in ground-truth order and returns the first
    /// allocated block's user offset, if any.
    pub fn first(&self) -> Option<usize> {
        self.next_after(None)
    }

    /// Returns the user offset of the next allocated block after `prev`, in
    /// the same ground-truth order `first` uses.
    pub fn next(&self, prev: usize) -> Option<usize> {
        self.next_after(Some(prev))
    }

    fn next_after(&self, prev: Option<usize>) -> Option<usize> {
        let mut seen_prev = prev.is_none();
        let mut prev_zone_chunk = None;
        if let Some(prev_off) = prev {
            let hdr = read_alloc_header(self.pmem, prev_off);
            prev_zone_chunk = Some((hdr.zone_id, hdr.chunk_id, prev_off));
        }

        for zone_id in 0..self.max_zone {
            if !self.active_zones.lock()[zone_id as usize] {
                continue;
            }
            let zone_size_idx = self.zone_size_idx(zone_id);
            let mut chunk_id = 0u32;
            while chunk_id < zone_size_idx {
                let hdr = read_chunk_header(self.pmem, zone_id, chunk_id, &self.cfg);
                match hdr.chunk_type() {
                    Some(ChunkType::Used) => {
                        let off = chunk_data_offset(zone_id, chunk_id, &self.cfg) + ALLOC_HEADER_SIZE;
                        if seen_prev {
                            return Some(off);
                        }
                        if prev_zone_chunk.map(|(_, _, o)| o) == Some(off) {
                            seen_prev = true;
                        }
                    }
                    Some(ChunkType::Run) => {
                        let run_hdr = read_run_header(self.pmem, zone_id, chunk_id, &self.cfg);
                        let nallocs = self.cfg.run_nallocs(run_hdr.block_size);
                        for i in 0..nallocs {
                            if !self.run_bit_is_set(zone_id, chunk_id, i) {
                                continue;
                            }
                            let off = run_data_offset(zone_id, chunk_id, &self.cfg)
                                + i as usize * run_hdr.block_size as usize
                                + ALLOC_HEADER_SIZE;
                            if seen_prev {
                                return Some(off);
                            }
                            if prev_zone_chunk.map(|(_, _, o)| o) == Some(off) {
                                seen_prev = true;
                            }
                        }
                    }
                    _ => {}
                }
                chunk_id += hdr.size_idx().max(1);
            }
        }
        None
    }
}
