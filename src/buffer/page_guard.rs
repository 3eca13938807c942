//! RAII guard for page access.
//!
//! [`PageGuard`] wraps the [`LockedPage`] handle of one page and gives it
//! back to the manager when dropped, so the page can never stay locked by
//! accident. Dropping discards nothing (the bytes are shared with the
//! mapping) but does not flush; call [`PageGuard::commit`] to unlock with a
//! synchronous write-back.

use std::ops::{Deref, DerefMut};

use log::warn;

use crate::buffer::BufferManager;
use crate::common::error::UnlockError;
use crate::common::{BufferPage, BufferSource};
use crate::storage::LockedPage;

/// Guard for exclusive access to a page.
///
/// # Example
/// ```
/// use pagebuf::BufferManager;
///
/// let bm = BufferManager::new(4096, 16);
/// let source = bm.load_memory_source().unwrap();
/// let page = bm.allocate_page(source).unwrap();
///
/// {
///     let mut guard = bm.write_page(source, page).unwrap();
///     guard[0] = 0xFF; // DerefMut to [u8]
/// } // guard drops here, page unlocked
///
/// let guard = bm.write_page(source, page).unwrap();
/// assert_eq!(guard[0], 0xFF);
/// guard.commit().unwrap();
/// ```
pub struct PageGuard<'a> {
    /// Reference back to the manager for unlock on drop.
    bm: &'a BufferManager,
    source: BufferSource,
    /// `None` once the handle has been given back.
    locked: Option<LockedPage>,
}

impl<'a> PageGuard<'a> {
    /// Called by `BufferManager::write_page()`.
    pub(crate) fn new(bm: &'a BufferManager, source: BufferSource, locked: LockedPage) -> Self {
        Self {
            bm,
            source,
            locked: Some(locked),
        }
    }

    #[inline]
    pub fn source(&self) -> BufferSource {
        self.source
    }

    #[inline]
    pub fn page(&self) -> BufferPage {
        self.handle().page()
    }

    /// Unlock the page, flushing it first if it is file-backed.
    ///
    /// # Errors
    /// On failure the page is still locked and its handle is returned in the
    /// error.
    pub fn commit(mut self) -> Result<(), UnlockError> {
        match self.locked.take() {
            Some(locked) => self.bm.unlock_page(self.source, locked.page(), locked, true),
            None => Ok(()),
        }
    }

    /// Take the raw handle out; the caller becomes responsible for unlocking.
    pub fn into_locked(mut self) -> Option<LockedPage> {
        self.locked.take()
    }

    fn handle(&self) -> &LockedPage {
        // Only `commit` and `into_locked` empty the slot, and both consume
        // the guard.
        match &self.locked {
            Some(locked) => locked,
            None => unreachable!("page guard used after release"),
        }
    }

    fn handle_mut(&mut self) -> &mut LockedPage {
        match &mut self.locked {
            Some(locked) => locked,
            None => unreachable!("page guard used after release"),
        }
    }
}

impl Deref for PageGuard<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.handle().as_slice()
    }
}

impl DerefMut for PageGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.handle_mut().as_mut_slice()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if let Some(locked) = self.locked.take() {
            let page = locked.page();
            if let Err(e) = self.bm.unlock_in_source(self.source, page, locked, false) {
                warn!("failed to unlock {} of {} on drop: {}", page, self.source, e);
            }
            // A second sweep panic while unwinding would abort.
            if !std::thread::panicking() {
                self.bm.swap_cache_if_necessary();
            }
        }
    }
}
