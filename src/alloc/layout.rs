//! On-media binary format: heap header, zones, chunk headers, runs, and
//! allocation headers (component C2).
//!
//! The heap is a flat byte region (offset 0 is the first byte of
//! [`HeapHeader`]; mapping that region into a pool at some other base offset
//! is the job of the out-of-scope pool/file layer). Every structure here is
//! read and written as explicit little-endian bytes rather than transmuted
//! in place, so the format does not depend on Rust's struct layout rules.

use crate::error::{PmError, Result};
use crate::pmem::PmemOps;
use tracing::warn;

/// On-media signature identifying a heap header, fixed at v1.0.
pub const HEAP_SIGNATURE: [u8; 8] = *b"PMEMHEAP";
pub const HEAP_MAJOR: u16 = 1;
pub const HEAP_MINOR: u16 = 0;

/// Magic value distinguishing an initialized zone header from the
/// all-zero bytes of an as-yet-unclaimed zone.
pub const ZONE_HEADER_MAGIC: u64 = 0xC74F_37F0_0000_0001;

pub const CHUNK_FLAG_ZEROED: u8 = 0b0001;

pub const HEAP_HEADER_SIZE: usize = 64;
pub const ZONE_HEADER_SIZE: usize = 16;
pub const CHUNK_HEADER_SIZE: usize = 8;
pub const RUN_HEADER_SIZE: usize = 24;
pub const ALLOC_HEADER_SIZE: usize = 16;

/// Number of 64-bit words in a run's allocation bitmap. At 64 bits per word
/// this bounds a run to at most 2048 equal-size blocks.
pub const NBITMAP_WORDS: usize = 32;
pub const RUN_BITMAP_BYTES: usize = NBITMAP_WORDS * 8;
pub const RUN_BITMAP_BITS: usize = NBITMAP_WORDS * 64;

/// Tunable layout constants. The defaults mirror libpmemobj's proportions
/// (256 KiB chunks, 4096 chunks per zone, i.e. ~1 GiB zones) scaled down for
/// tests via the builder methods; a pool remains self-describing regardless
/// of the config used to create it, because `chunksize`/`chunks_per_zone`
/// are also stored in the on-media [`HeapHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub chunksize: u64,
    pub chunks_per_zone: u32,
    pub zone_min_size: u64,
    /// Number of lanes, each owning one redo log, reserved right after the
    /// heap header and before the first zone. Defaults to the host's CPU
    /// count the way libpmemobj sizes its lane pool.
    pub num_lanes: u32,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            chunksize: 256 * 1024,
            chunks_per_zone: 4096,
            zone_min_size: 256 * 1024 * 8,
            num_lanes: num_cpus::get() as u32,
        }
    }
}

impl HeapConfig {
    /// Full byte size of a zone with every chunk slot populated: header +
    /// chunk-header array + chunk data array.
    pub fn zone_max_size(&self) -> u64 {
        ZONE_HEADER_SIZE as u64
            + self.chunks_per_zone as u64 * CHUNK_HEADER_SIZE as u64
            + self.chunks_per_zone as u64 * self.chunksize
    }

    /// Byte size of the lane pool reserved between the heap header and the
    /// first zone.
    pub fn lanes_region_size(&self) -> u64 {
        self.num_lanes as u64 * crate::redo::REDO_LOG_SIZE as u64
    }

    /// Minimum heap size that can hold the lane pool and a single viable
    /// (possibly partial) zone.
    pub fn heap_min_size(&self) -> u64 {
        HEAP_HEADER_SIZE as u64 + self.lanes_region_size() + self.zone_min_size
    }

    /// `nallocs` for a run with the given per-unit stride (block size
    /// including its allocation header), i.e. how many equal-size units fit
    /// in one chunk once the run header and bitmap are subtracted.
    pub fn run_nallocs(&self, unit_stride: u64) -> u32 {
        let avail = self.chunksize.saturating_sub((RUN_HEADER_SIZE + RUN_BITMAP_BYTES) as u64);
        let n = avail / unit_stride;
        n.min(RUN_BITMAP_BITS as u64) as u32
    }
}

/// Persistent heap header. Checksum is valid iff the header is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapHeader {
    pub signature: [u8; 8],
    pub major: u16,
    pub minor: u16,
    pub size: u64,
    pub chunksize: u64,
    pub chunks_per_zone: u32,
    pub num_lanes: u32,
    pub zone_min_size: u64,
    pub checksum: u64,
}

const HDR_SIGNATURE: usize = 0;
const HDR_MAJOR: usize = 8;
const HDR_MINOR: usize = 10;
const HDR_RESERVED0: usize = 12;
const HDR_SIZE: usize = 16;
const HDR_CHUNKSIZE: usize = 24;
const HDR_CHUNKS_PER_ZONE: usize = 32;
const HDR_NUM_LANES: usize = 36;
const HDR_ZONE_MIN_SIZE: usize = 40;
const HDR_PADDING: usize = 48;
const HDR_CHECKSUM: usize = 56;

impl HeapHeader {
    fn to_bytes(self) -> [u8; HEAP_HEADER_SIZE] {
        let mut buf = [0u8; HEAP_HEADER_SIZE];
        buf[HDR_SIGNATURE..HDR_SIGNATURE + 8].copy_from_slice(&self.signature);
        buf[HDR_MAJOR..HDR_MAJOR + 2].copy_from_slice(&self.major.to_le_bytes());
        buf[HDR_MINOR..HDR_MINOR + 2].copy_from_slice(&self.minor.to_le_bytes());
        buf[HDR_RESERVED0..HDR_RESERVED0 + 4].copy_from_slice(&0u32.to_le_bytes());
        buf[HDR_SIZE..HDR_SIZE + 8].copy_from_slice(&self.size.to_le_bytes());
        buf[HDR_CHUNKSIZE..HDR_CHUNKSIZE + 8].copy_from_slice(&self.chunksize.to_le_bytes());
        buf[HDR_CHUNKS_PER_ZONE..HDR_CHUNKS_PER_ZONE + 4]
            .copy_from_slice(&self.chunks_per_zone.to_le_bytes());
        buf[HDR_NUM_LANES..HDR_NUM_LANES + 4].copy_from_slice(&self.num_lanes.to_le_bytes());
        buf[HDR_ZONE_MIN_SIZE..HDR_ZONE_MIN_SIZE + 8].copy_from_slice(&self.zone_min_size.to_le_bytes());
        buf[HDR_PADDING..HDR_CHECKSUM].fill(0);
        buf[HDR_CHECKSUM..HDR_CHECKSUM + 8].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEAP_HEADER_SIZE]) -> Self {
        HeapHeader {
            signature: buf[HDR_SIGNATURE..HDR_SIGNATURE + 8].try_into().unwrap(),
            major: u16::from_le_bytes(buf[HDR_MAJOR..HDR_MAJOR + 2].try_into().unwrap()),
            minor: u16::from_le_bytes(buf[HDR_MINOR..HDR_MINOR + 2].try_into().unwrap()),
            size: u64::from_le_bytes(buf[HDR_SIZE..HDR_SIZE + 8].try_into().unwrap()),
            chunksize: u64::from_le_bytes(buf[HDR_CHUNKSIZE..HDR_CHUNKSIZE + 8].try_into().unwrap()),
            chunks_per_zone: u32::from_le_bytes(
                buf[HDR_CHUNKS_PER_ZONE..HDR_CHUNKS_PER_ZONE + 4].try_into().unwrap(),
            ),
            num_lanes: u32::from_le_bytes(buf[HDR_NUM_LANES..HDR_NUM_LANES + 4].try_into().unwrap()),
            zone_min_size: u64::from_le_bytes(
                buf[HDR_ZONE_MIN_SIZE..HDR_ZONE_MIN_SIZE + 8].try_into().unwrap(),
            ),
            checksum: u64::from_le_bytes(buf[HDR_CHECKSUM..HDR_CHECKSUM + 8].try_into().unwrap()),
        }
    }

    fn compatible_version(&self) -> bool {
        self.major == HEAP_MAJOR && self.minor == HEAP_MINOR
    }
}

/// Initializes the heap header at the start of `pmem`. Fails with
/// [`PmError::HeapTooSmall`] if the region is smaller than the minimum
/// viable heap. Writes are durable before this returns.
pub fn heap_init<P: PmemOps>(pmem: &P, cfg: &HeapConfig) -> Result<()> {
    let heap_size = pmem.len() as u64;
    if heap_size < cfg.heap_min_size() {
        return Err(PmError::HeapTooSmall);
    }

    let mut hdr = HeapHeader {
        signature: HEAP_SIGNATURE,
        major: HEAP_MAJOR,
        minor: HEAP_MINOR,
        size: heap_size,
        chunksize: cfg.chunksize,
        chunks_per_zone: cfg.chunks_per_zone,
        num_lanes: cfg.num_lanes,
        zone_min_size: cfg.zone_min_size,
        checksum: 0,
    };
    let bytes = hdr.to_bytes();
    hdr.checksum = crate::checksum::compute(&bytes, HDR_CHECKSUM);
    let bytes = hdr.to_bytes();

    unsafe {
        pmem.memcpy_persist(0, bytes.as_ptr(), HEAP_HEADER_SIZE);
    }
    Ok(())
}

fn read_header<P: PmemOps>(pmem: &P) -> HeapHeader {
    let mut buf = [0u8; HEAP_HEADER_SIZE];
    unsafe {
        buf.copy_from_slice(pmem.slice(0, HEAP_HEADER_SIZE));
    }
    HeapHeader::from_bytes(&buf)
}

/// Recovers the `HeapConfig` a heap was created with from its on-media
/// header, so opening a pool never depends on the caller remembering the
/// config it was built with.
pub fn heap_config_from_header<P: PmemOps>(pmem: &P) -> HeapConfig {
    let hdr = read_header(pmem);
    HeapConfig {
        chunksize: hdr.chunksize,
        chunks_per_zone: hdr.chunks_per_zone,
        zone_min_size: hdr.zone_min_size,
        num_lanes: hdr.num_lanes,
    }
}

/// Verifies the header checksum and every zone's chunk-header chain
/// (spec §3 invariants). Returns `Ok(())` or [`PmError::Corrupt`].
pub fn heap_check<P: PmemOps>(pmem: &P) -> Result<()> {
    let mut buf = vec![0u8; HEAP_HEADER_SIZE];
    unsafe {
        buf.copy_from_slice(pmem.slice(0, HEAP_HEADER_SIZE));
    }
    if !crate::checksum::verify(&buf, HDR_CHECKSUM) {
        warn!("heap header checksum mismatch");
        return Err(PmError::Corrupt("heap header checksum mismatch"));
    }
    let hdr = read_header(pmem);
    if hdr.signature != HEAP_SIGNATURE {
        warn!("heap header signature mismatch");
        return Err(PmError::Corrupt("heap header signature mismatch"));
    }
    if !hdr.compatible_version() {
        warn!(major = hdr.major, minor = hdr.minor, "heap header version unsupported");
        return Err(PmError::Corrupt("heap header version unsupported"));
    }

    let cfg = HeapConfig {
        chunksize: hdr.chunksize,
        chunks_per_zone: hdr.chunks_per_zone,
        zone_min_size: hdr.zone_min_size,
        num_lanes: hdr.num_lanes,
    };

    // `heap_check` must fail (`CORRUPT`) iff *any* zone fails: once `ok`
    // drops to false it must stay false, so this folds with a one-way
    // latch rather than re-ORing each zone's own success flag back in.
    let mut ok = true;
    let max_zone = heap_max_zone(hdr.size, &cfg);
    for zone_id in 0..max_zone {
        if let Err(e) = verify_zone(pmem, &cfg, zone_id, max_zone, hdr.size) {
            warn!(zone_id, reason = %e, "zone failed consistency check");
            ok = false;
        }
    }
    if ok {
        Ok(())
    } else {
        warn!("zone chunk-header chain inconsistent");
        Err(PmError::Corrupt("zone chunk-header chain inconsistent"))
    }
}

/// Counts how many max-size zones (plus one trailing partial zone, if it
/// clears `zone_min_size`) fit in a heap of `heap_size` bytes.
pub fn heap_max_zone(heap_size: u64, cfg: &HeapConfig) -> u32 {
    let mut size = heap_size.saturating_sub(HEAP_HEADER_SIZE as u64 + cfg.lanes_region_size());
    let zone_max = cfg.zone_max_size();
    let mut max_zone = 0u32;
    while size > cfg.zone_min_size {
        max_zone += 1;
        size -= size.min(zone_max);
    }
    max_zone
}

/// Number of chunks that belong to `zone_id` given `max_zone` total zones.
pub fn zone_size_idx(zone_id: u32, max_zone: u32, heap_size: u64, cfg: &HeapConfig) -> u32 {
    if zone_id + 1 < max_zone {
        return cfg.chunks_per_zone;
    }
    let zone_max = cfg.zone_max_size();
    let zones_base = HEAP_HEADER_SIZE as u64 + cfg.lanes_region_size();
    let zone_raw = heap_size - zones_base - zone_id as u64 * zone_max;
    let zone_raw = zone_raw.saturating_sub(ZONE_HEADER_SIZE as u64);
    (zone_raw / cfg.chunksize) as u32
}

/// Byte offset of the start of zone `zone_id` within the heap.
pub fn zone_offset(zone_id: u32, cfg: &HeapConfig) -> usize {
    HEAP_HEADER_SIZE + cfg.lanes_region_size() as usize + zone_id as usize * cfg.zone_max_size() as usize
}

/// Byte offset where the lane pool begins (right after the heap header).
pub fn lanes_region_offset() -> usize {
    HEAP_HEADER_SIZE
}

fn chunk_headers_offset(zone_id: u32, cfg: &HeapConfig) -> usize {
    zone_offset(zone_id, cfg) + ZONE_HEADER_SIZE
}

fn chunks_offset(zone_id: u32, cfg: &HeapConfig) -> usize {
    chunk_headers_offset(zone_id, cfg) + cfg.chunks_per_zone as usize * CHUNK_HEADER_SIZE
}

/// Byte offset of chunk header `chunk_id` in zone `zone_id`.
pub fn chunk_header_offset(zone_id: u32, chunk_id: u32, cfg: &HeapConfig) -> usize {
    chunk_headers_offset(zone_id, cfg) + chunk_id as usize * CHUNK_HEADER_SIZE
}

/// Byte offset of chunk `chunk_id`'s data area in zone `zone_id`.
pub fn chunk_data_offset(zone_id: u32, chunk_id: u32, cfg: &HeapConfig) -> usize {
    chunks_offset(zone_id, cfg) + chunk_id as usize * cfg.chunksize as usize
}

/// A chunk's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Unknown = 0,
    Free = 1,
    Used = 2,
    Run = 3,
    RunData = 4,
}

impl ChunkType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => ChunkType::Unknown,
            1 => ChunkType::Free,
            2 => ChunkType::Used,
            3 => ChunkType::Run,
            4 => ChunkType::RunData,
            _ => return None,
        })
    }
}

/// A chunk header: `type:4 | flags:4 | size_idx:24 | reserved:32` packed
/// into a single 8-byte word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader(u64);

impl ChunkHeader {
    pub fn new(ty: ChunkType, flags: u8, size_idx: u32) -> Self {
        let v = (ty as u64 & 0xF) | ((flags as u64 & 0xF) << 4) | ((size_idx as u64 & 0x00FF_FFFF) << 8);
        ChunkHeader(v)
    }

    pub fn chunk_type(&self) -> Option<ChunkType> {
        ChunkType::from_u8((self.0 & 0xF) as u8)
    }

    pub fn flags(&self) -> u8 {
        ((self.0 >> 4) & 0xF) as u8
    }

    pub fn is_zeroed(&self) -> bool {
        self.flags() & CHUNK_FLAG_ZEROED != 0
    }

    pub fn size_idx(&self) -> u32 {
        ((self.0 >> 8) & 0x00FF_FFFF) as u32
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        ChunkHeader(bits)
    }
}

/// Reads the chunk header at `(zone_id, chunk_id)`.
pub fn read_chunk_header<P: PmemOps>(pmem: &P, zone_id: u32, chunk_id: u32, cfg: &HeapConfig) -> ChunkHeader {
    let off = chunk_header_offset(zone_id, chunk_id, cfg);
    let bits: u64 = unsafe { pmem.read(off) };
    ChunkHeader::from_bits(bits)
}

/// Writes and persists the chunk header at `(zone_id, chunk_id)`.
pub fn write_chunk_header<P: PmemOps>(
    pmem: &P,
    zone_id: u32,
    chunk_id: u32,
    cfg: &HeapConfig,
    hdr: ChunkHeader,
) {
    let off = chunk_header_offset(zone_id, chunk_id, cfg);
    unsafe {
        pmem.write_persist(off, hdr.to_bits());
    }
}

/// Zone header magic + chunk count.
pub struct ZoneHeader {
    pub magic: u64,
    pub size_idx: u32,
}

pub fn read_zone_header<P: PmemOps>(pmem: &P, zone_id: u32, cfg: &HeapConfig) -> ZoneHeader {
    let off = zone_offset(zone_id, cfg);
    let magic: u64 = unsafe { pmem.read(off) };
    let size_idx: u32 = unsafe { pmem.read(off + 8) };
    ZoneHeader { magic, size_idx }
}

/// Lazily initializes zone `zone_id`: writes a single free chunk spanning
/// the whole zone, then publishes the zone header's magic. Idempotent if
/// called on an already-initialized zone (no-op after the magic check done
/// by the caller).
pub fn heap_zone_init<P: PmemOps>(pmem: &P, zone_id: u32, max_zone: u32, heap_size: u64, cfg: &HeapConfig) {
    let size_idx = zone_size_idx(zone_id, max_zone, heap_size, cfg);
    write_chunk_header(pmem, zone_id, 0, cfg, ChunkHeader::new(ChunkType::Free, 0, size_idx));

    let off = zone_offset(zone_id, cfg);
    unsafe {
        pmem.write_persist(off + 8, size_idx);
        pmem.write_persist::<u64>(off, ZONE_HEADER_MAGIC);
    }
}

fn verify_chunk_header(hdr: ChunkHeader) -> bool {
    match hdr.chunk_type() {
        None | Some(ChunkType::Unknown) => false,
        Some(_) => hdr.flags() & !CHUNK_FLAG_ZEROED == 0,
    }
}

fn verify_zone<P: PmemOps>(
    pmem: &P,
    cfg: &HeapConfig,
    zone_id: u32,
    max_zone: u32,
    heap_size: u64,
) -> Result<()> {
    let zh = read_zone_header(pmem, zone_id, cfg);
    if zh.magic != ZONE_HEADER_MAGIC {
        // Not yet activated: vacuously consistent.
        return Ok(());
    }
    if zh.size_idx == 0 {
        return Err(PmError::Corrupt("zone header size_idx is zero"));
    }
    let expected = zone_size_idx(zone_id, max_zone, heap_size, cfg);
    if zh.size_idx != expected {
        return Err(PmError::Corrupt("zone header size_idx mismatch"));
    }

    let mut i = 0u32;
    while i < zh.size_idx {
        let hdr = read_chunk_header(pmem, zone_id, i, cfg);
        if !verify_chunk_header(hdr) {
            return Err(PmError::Corrupt("invalid chunk header in chain"));
        }
        let step = hdr.size_idx();
        if step == 0 {
            return Err(PmError::Corrupt("zero-length chunk in chain"));
        }
        i += step;
    }
    if i != zh.size_idx {
        return Err(PmError::Corrupt("chunk-header chain overruns zone"));
    }
    Ok(())
}

/// Persistent allocation header preceding every user range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationHeader {
    pub size: u64,
    pub chunk_id: u32,
    pub zone_id: u32,
}

impl AllocationHeader {
    pub fn to_bytes(self) -> [u8; ALLOC_HEADER_SIZE] {
        let mut buf = [0u8; ALLOC_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.chunk_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.zone_id.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; ALLOC_HEADER_SIZE]) -> Self {
        AllocationHeader {
            size: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            chunk_id: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            zone_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

pub fn read_alloc_header<P: PmemOps>(pmem: &P, user_off: usize) -> AllocationHeader {
    let hdr_off = user_off - ALLOC_HEADER_SIZE;
    let mut buf = [0u8; ALLOC_HEADER_SIZE];
    unsafe {
        buf.copy_from_slice(pmem.slice(hdr_off, ALLOC_HEADER_SIZE));
    }
    AllocationHeader::from_bytes(&buf)
}

pub fn write_alloc_header<P: PmemOps>(pmem: &P, user_off: usize, hdr: AllocationHeader) {
    let hdr_off = user_off - ALLOC_HEADER_SIZE;
    let bytes = hdr.to_bytes();
    unsafe {
        pmem.memcpy_persist(hdr_off, bytes.as_ptr(), ALLOC_HEADER_SIZE);
    }
}

/// A run's fixed-size prefix: block size, bitmap bookkeeping. The bitmap
/// words themselves follow immediately after in the run's chunk.
#[derive(Debug, Clone, Copy)]
pub struct RunHeader {
    pub block_size: u64,
    pub bitmap_nval: u32,
    pub bitmap_lastval: u64,
}

impl RunHeader {
    pub fn to_bytes(self) -> [u8; RUN_HEADER_SIZE] {
        let mut buf = [0u8; RUN_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.block_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.bitmap_nval.to_le_bytes());
        buf[16..24].copy_from_slice(&self.bitmap_lastval.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; RUN_HEADER_SIZE]) -> Self {
        RunHeader {
            block_size: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            bitmap_nval: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            bitmap_lastval: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }
}

pub fn run_header_offset(zone_id: u32, chunk_id: u32, cfg: &HeapConfig) -> usize {
    chunk_data_offset(zone_id, chunk_id, cfg)
}

pub fn run_bitmap_offset(zone_id: u32, chunk_id: u32, cfg: &HeapConfig) -> usize {
    run_header_offset(zone_id, chunk_id, cfg) + RUN_HEADER_SIZE
}

pub fn run_data_offset(zone_id: u32, chunk_id: u32, cfg: &HeapConfig) -> usize {
    run_bitmap_offset(zone_id, chunk_id, cfg) + RUN_BITMAP_BYTES
}

pub fn read_run_header<P: PmemOps>(pmem: &P, zone_id: u32, chunk_id: u32, cfg: &HeapConfig) -> RunHeader {
    let off = run_header_offset(zone_id, chunk_id, cfg);
    let mut buf = [0u8; RUN_HEADER_SIZE];
    unsafe {
        buf.copy_from_slice(pmem.slice(off, RUN_HEADER_SIZE));
    }
    RunHeader::from_bytes(&buf)
}

pub fn write_run_header<P: PmemOps>(pmem: &P, zone_id: u32, chunk_id: u32, cfg: &HeapConfig, hdr: RunHeader) {
    let off = run_header_offset(zone_id, chunk_id, cfg);
    let bytes = hdr.to_bytes();
    unsafe {
        pmem.memcpy_persist(off, bytes.as_ptr(), RUN_HEADER_SIZE);
    }
}

pub fn read_bitmap_word<P: PmemOps>(pmem: &P, zone_id: u32, chunk_id: u32, cfg: &HeapConfig, word: usize) -> u64 {
    let off = run_bitmap_offset(zone_id, chunk_id, cfg) + word * 8;
    unsafe { pmem.read(off) }
}

pub fn write_bitmap_word<P: PmemOps>(
    pmem: &P,
    zone_id: u32,
    chunk_id: u32,
    cfg: &HeapConfig,
    word: usize,
    value: u64,
) {
    let off = run_bitmap_offset(zone_id, chunk_id, cfg) + word * 8;
    unsafe {
        pmem.write_persist(off, value);
    }
}
