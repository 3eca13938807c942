//! Error types for pagebuf.

use thiserror::Error;

use crate::common::{BufferPage, BufferSource};
use crate::storage::LockedPage;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable failures of the buffer manager.
///
/// Every fallible operation reports one of these instead of a sentinel
/// value. The one unrecoverable condition, a cache that cannot be brought
/// back under budget, panics instead.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from open, truncate, mmap or msync.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source was never loaded or has been unloaded.
    #[error("{0} not found")]
    SourceNotFound(BufferSource),

    /// Every source index has been handed out.
    #[error("source index space exhausted")]
    SourceIndexExhausted,

    /// The page index is not below the source's total page count.
    #[error("{page} out of range (total pages: {total})")]
    PageOutOfRange { page: BufferPage, total: u64 },

    /// The page belongs to the free-list.
    #[error("{0} is reserved for the free-list")]
    PageReserved(BufferPage),

    /// The page is free and has not been reallocated.
    #[error("{0} is not allocated")]
    PageNotAllocated(BufferPage),

    /// The page has no mapping in its source.
    #[error("{0} is not mapped")]
    PageNotMapped(BufferPage),

    /// The page is locked by another holder.
    #[error("{0} is locked")]
    PageLocked(BufferPage),

    /// Unlock was requested for a page nobody holds.
    #[error("{0} is not locked")]
    PageNotLocked(BufferPage),

    /// The handle passed to unlock belongs to a different mapping.
    #[error("address does not match the mapping of {0}")]
    AddressMismatch(BufferPage),

    /// A pointer offset does not fit in a page.
    #[error("offset {offset} out of range for page size {page_size}")]
    OffsetOutOfRange { offset: u64, page_size: u64 },

    /// The page index does not fit in a pointer.
    #[error("{0} cannot be encoded in a pointer")]
    PageIndexOverflow(BufferPage),

    /// The backing file does not hold a valid free-list structure.
    #[error("corrupt source: {0}")]
    CorruptSource(String),
}

/// A rejected unlock, handing the lock token back to the caller.
///
/// The page stays locked, so the caller can retry with the right page or
/// surface the error.
#[derive(Error, Debug)]
#[error("unlock of {} failed: {error}", .page.page())]
pub struct UnlockError {
    #[source]
    pub error: Error,
    pub page: LockedPage,
}

impl UnlockError {
    pub(crate) fn new(error: Error, page: LockedPage) -> Self {
        Self { error, page }
    }

    /// Split into the cause and the still-locked handle.
    pub fn into_parts(self) -> (Error, LockedPage) {
        (self.error, self.page)
    }
}
