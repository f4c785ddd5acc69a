//! A crash-consistent object allocator for persistent memory.
//!
//! The heap is a flat byte region backed by whatever implements
//! [`pmem::PmemOps`] — a DAX-mapped file, a `mmap`'d region, or (for tests)
//! a plain heap buffer. Every mutation that must survive a crash goes
//! through a per-lane redo log ([`redo`], [`lane`]): either every store in a
//! request is visible after recovery, or none are.
//!
//! # Layout
//!
//! The heap is divided into zones, each a run of same-size chunks tracked
//! by a packed chunk-header chain ([`alloc::layout`]). A chunk is either
//! free, a single large ("huge") allocation, or subdivided into a run of
//! equal-size blocks tracked by a bitmap. [`alloc::bucket`] groups free
//! chunks and run blocks into size classes; [`alloc::heap`] is the engine
//! that finds, splits, and coalesces them.
//!
//! # Usage
//!
//! ```
//! use palloc::pmem::test_util::VecPmem;
//! use palloc::palloc::PAlloc;
//! use palloc::alloc::layout::HeapConfig;
//!
//! let pmem = VecPmem::new(16 * 1024 * 1024);
//! let heap = PAlloc::create(&pmem, &HeapConfig::default()).unwrap();
//! let off = heap.alloc(128).unwrap();
//! heap.free(off);
//! ```

pub mod alloc;
pub mod checksum;
pub mod error;
pub mod lane;
pub mod palloc;
pub mod pmem;
pub mod redo;

pub use error::{PmError, Result};
