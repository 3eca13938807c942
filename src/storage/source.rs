//! The capability every page source implements.

use std::path::Path;

use crate::buffer::BufferStats;
use crate::common::error::UnlockError;
use crate::common::{BufferPage, BufferSource, Error, Result};
use crate::storage::page_memory::{LockedPage, PageDesc};

/// A mapped, unlocked page the manager may evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmapCandidate {
    pub source: BufferSource,
    pub page: BufferPage,
    /// Access stamp; smaller is older.
    pub last_access: u64,
}

/// One backing store divided into pages: a memory arena or a file.
///
/// Implementations are not synchronized themselves. The manager wraps each
/// one in its own mutex and calls these methods with it held.
///
/// # Page Lifecycle
/// ```text
/// Unmapped ──map/lock──▶ Mapped(unlocked) ──lock──▶ Mapped(locked)
///    ▲                        │   ▲                        │
///    └──────unmap/free────────┘   └─────────unlock─────────┘
/// ```
pub trait PageSource: Send {
    /// Handle this source is registered under.
    fn source(&self) -> BufferSource;

    /// Backing file, `None` for memory sources.
    fn file_name(&self) -> Option<&Path>;

    /// Release every mapping (and close the file). Called once.
    fn unload(&mut self) -> Result<()>;

    /// Map `page` if needed and refresh its access stamp.
    fn map_page(&mut self, page: BufferPage) -> Result<()>;

    /// Release the mapping of an unlocked page.
    fn unmap_page(&mut self, page: BufferPage) -> Result<()>;

    /// Take the exclusive-access token of an allocated page.
    fn lock_page(&mut self, page: BufferPage) -> Result<LockedPage>;

    /// Return the token, optionally writing the page back first.
    fn unlock_page(
        &mut self,
        page: BufferPage,
        locked: LockedPage,
        persist: bool,
    ) -> std::result::Result<(), UnlockError>;

    /// Reuse a freed page or grow the source by one page.
    fn allocate_page(&mut self) -> Result<BufferPage>;

    /// Put an unlocked, allocated page on the free-list.
    fn free_page(&mut self, page: BufferPage) -> Result<()>;

    /// Append up to `expect` unlocked mapped pages, oldest access first.
    fn fill_unmap_candidates(&self, candidates: &mut Vec<UnmapCandidate>, expect: usize);

    /// Write every unlocked mapped page back to storage.
    fn flush(&mut self) -> Result<()>;

    /// Pages in the source, free-list pages included.
    fn total_page_count(&self) -> u64;

    fn mapped_page_count(&self) -> usize;

    fn is_mapped(&self, page: BufferPage) -> bool;
}

/// Hand out the lock token of a mapped page.
pub(crate) fn lock_desc(page: BufferPage, desc: &mut PageDesc) -> Result<LockedPage> {
    if desc.locked {
        return Err(Error::PageLocked(page));
    }
    desc.locked = true;
    Ok(LockedPage::new(page, desc.memory.clone()))
}

/// Take a lock token back, flushing file pages when `persist` is set.
pub(crate) fn unlock_desc(
    page: BufferPage,
    desc: Option<&mut PageDesc>,
    locked: LockedPage,
    persist: bool,
    stats: &BufferStats,
) -> std::result::Result<(), UnlockError> {
    let desc = match desc {
        Some(desc) => desc,
        None => return Err(UnlockError::new(Error::PageNotMapped(page), locked)),
    };
    if desc.memory.address() != locked.address() {
        return Err(UnlockError::new(Error::AddressMismatch(page), locked));
    }
    if !desc.locked {
        return Err(UnlockError::new(Error::PageNotLocked(page), locked));
    }

    drop(locked);
    desc.locked = false;
    if persist && desc.memory.is_mapped_file() {
        if let Err(e) = desc.memory.flush() {
            return Err(UnlockError::new(e.into(), relock(page, desc)));
        }
        stats.page_flushed();
    }
    Ok(())
}

/// Give the token back to the caller after a failed flush.
fn relock(page: BufferPage, desc: &mut PageDesc) -> LockedPage {
    desc.locked = true;
    LockedPage::new(page, desc.memory.clone())
}

/// Sort unlocked `(page, last_access)` pairs oldest first and keep `expect`.
pub(crate) fn push_candidates(
    source: BufferSource,
    mut unlocked: Vec<(BufferPage, u64)>,
    candidates: &mut Vec<UnmapCandidate>,
    expect: usize,
) {
    unlocked.sort_by_key(|&(_, last_access)| last_access);
    candidates.extend(
        unlocked
            .into_iter()
            .take(expect)
            .map(|(page, last_access)| UnmapCandidate {
                source,
                page,
                last_access,
            }),
    );
}
