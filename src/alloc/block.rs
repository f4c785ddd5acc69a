//! A `MemoryBlock` locates one allocatable unit — either an entire chunk
//! (the huge path) or one slot of a run's bitmap (the run path) — without
//! needing any further pmem reads to compute its offsets (component C3).

use super::layout::{
    chunk_data_offset, read_chunk_header, read_run_header, run_data_offset, ChunkType, HeapConfig,
    ALLOC_HEADER_SIZE,
};
use crate::pmem::PmemOps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBlock {
    /// One or more whole chunks, allocated directly out of a zone.
    Huge { zone_id: u32, chunk_id: u32, size_idx: u32 },
    /// A single unit-sized slot inside a run chunk.
    Run {
        zone_id: u32,
        chunk_id: u32,
        block_off: u32,
        unit_size: u64,
    },
}

impl MemoryBlock {
    pub fn zone_id(&self) -> u32 {
        match *self {
            MemoryBlock::Huge { zone_id, .. } => zone_id,
            MemoryBlock::Run { zone_id, .. } => zone_id,
        }
    }

    pub fn chunk_id(&self) -> u32 {
        match *self {
            MemoryBlock::Huge { chunk_id, .. } => chunk_id,
            MemoryBlock::Run { chunk_id, .. } => chunk_id,
        }
    }

    /// Offset of the first byte available to the caller, i.e. immediately
    /// after the allocation header.
    pub fn user_offset(&self, cfg: &HeapConfig) -> usize {
        self.header_offset(cfg) + ALLOC_HEADER_SIZE
    }

    /// Offset of the allocation header that precedes the user range.
    pub fn header_offset(&self, cfg: &HeapConfig) -> usize {
        match *self {
            MemoryBlock::Huge { zone_id, chunk_id, .. } => chunk_data_offset(zone_id, chunk_id, cfg),
            MemoryBlock::Run {
                zone_id,
                chunk_id,
                block_off,
                unit_size,
            } => run_data_offset(zone_id, chunk_id, cfg) + block_off as usize * unit_size as usize,
        }
    }

    /// Bytes available to the caller (total unit size minus the header).
    pub fn usable_size(&self, cfg: &HeapConfig) -> u64 {
        match *self {
            MemoryBlock::Huge { size_idx, .. } => size_idx as u64 * cfg.chunksize - ALLOC_HEADER_SIZE as u64,
            MemoryBlock::Run { unit_size, .. } => unit_size - ALLOC_HEADER_SIZE as u64,
        }
    }

    /// Number of bitmap bits this block occupies: 1 for a run slot, the
    /// whole chunk range for a huge allocation (huge chunks aren't
    /// bitmap-tracked, so this is only meaningful for [`MemoryBlock::Run`]).
    pub fn is_run(&self) -> bool {
        matches!(self, MemoryBlock::Run { .. })
    }
}

/// Reconstructs the `MemoryBlock` a previously returned user pointer
/// belongs to, given the chunk it lives in. Used by `free`/`realloc`, which
/// only have the allocation header's `(zone_id, chunk_id)` to start from.
pub fn locate<P: PmemOps>(pmem: &P, cfg: &HeapConfig, zone_id: u32, chunk_id: u32, user_off: usize) -> MemoryBlock {
    let chdr = read_chunk_header(pmem, zone_id, chunk_id, cfg);
    match chdr.chunk_type() {
        Some(ChunkType::Run) | Some(ChunkType::RunData) => {
            let run_hdr = read_run_header(pmem, zone_id, chunk_id, cfg);
            let data_off = run_data_offset(zone_id, chunk_id, cfg);
            let header_off = user_off - ALLOC_HEADER_SIZE;
            let block_off = ((header_off - data_off) as u64 / run_hdr.block_size) as u32;
            MemoryBlock::Run {
                zone_id,
                chunk_id,
                block_off,
                unit_size: run_hdr.block_size,
            }
        }
        _ => MemoryBlock::Huge {
            zone_id,
            chunk_id,
            size_idx: chdr.size_idx(),
        },
    }
}
