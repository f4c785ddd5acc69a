//! Status codes surfaced to callers of the allocator façade.

use thiserror::Error;

/// A `Result` type bound to [`PmError`].
pub type Result<T> = std::result::Result<T, PmError>;

/// Error categories the core can return. These mirror the status codes of
/// the on-media/ABI surface rather than a free-form string: callers branch
/// on the kind of failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PmError {
    /// No free block of the requested size could be found anywhere in the
    /// heap, including after activating every remaining zone.
    #[error("out of memory")]
    OutOfMemory,

    /// A run bucket's `calc_units` rejected the request outright because it
    /// exceeds that class's configured unit span. Whole-pool exhaustion is
    /// never reported this way, even for a request bigger than the entire
    /// heap: that always surfaces as [`PmError::OutOfMemory`] once every
    /// zone's huge bucket has been tried.
    #[error("requested size too large")]
    TooLarge,

    /// The heap region is smaller than the minimum viable heap size.
    #[error("heap region too small")]
    HeapTooSmall,

    /// A consistency check (header checksum, chunk-header chain, redo log
    /// checksum) failed. The reason is a short, static description for
    /// logging; it is not meant to be parsed.
    #[error("persistent heap corrupt: {0}")]
    Corrupt(&'static str),

    /// A non-blocking lock acquisition (bucket or lane) could not proceed
    /// immediately. Retrying later may succeed.
    #[error("lock contention, try again")]
    Again,
}
