//! Memory Source - pages held in heap blocks.
//!
//! A [`MemorySource`] keeps one zeroed heap block per mapped page in an
//! arena indexed by page number. Its free-list lives in page 0 exactly as
//! in a file source, so both backends allocate and reuse pages the same
//! way. Nothing is written anywhere: unloading the source discards it.

use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};

use crate::buffer::BufferStats;
use crate::common::error::UnlockError;
use crate::common::{BufferPage, BufferSource, Error, Result};
use crate::storage::free_list::{FreeList, PageStore};
use crate::storage::page_memory::{LockedPage, PageDesc, PageMemory};
use crate::storage::source::{self, PageSource, UnmapCandidate};

/// Arena of heap-backed page descriptors.
struct HeapPages {
    page_size: u64,
    /// Slot `n` holds page `n` while it is mapped.
    descs: Vec<Option<PageDesc>>,
    stats: Arc<BufferStats>,
}

impl HeapPages {
    fn map(&mut self, page: BufferPage) -> Result<&mut PageDesc> {
        let len = self.descs.len() as u64;
        if page.index > len {
            return Err(Error::PageOutOfRange { page, total: len });
        }
        let index = page.index as usize;
        if page.index == len {
            self.descs.push(None);
        }

        let stamp = self.stats.tick();
        match &mut self.descs[index] {
            Some(desc) => desc.last_access = stamp,
            slot @ None => {
                let memory = PageMemory::heap(self.page_size as usize)?;
                *slot = Some(PageDesc::new(memory, page.index * self.page_size, stamp));
                self.stats.page_mapped();
                trace!("allocated heap block for {}", page);
            }
        }
        self.descs[index]
            .as_mut()
            .ok_or(Error::PageNotMapped(page))
    }

    fn get_mut(&mut self, page: BufferPage) -> Option<&mut PageDesc> {
        self.descs
            .get_mut(page.index as usize)
            .and_then(Option::as_mut)
    }

    fn get(&self, page: BufferPage) -> Option<&PageDesc> {
        self.descs.get(page.index as usize).and_then(Option::as_ref)
    }

    fn unmap(&mut self, page: BufferPage) -> Result<()> {
        let slot = self
            .descs
            .get_mut(page.index as usize)
            .ok_or(Error::PageNotMapped(page))?;
        match slot.as_ref().map(|desc| desc.locked) {
            None => Err(Error::PageNotMapped(page)),
            Some(true) => Err(Error::PageLocked(page)),
            Some(false) => {
                *slot = None;
                self.stats.page_unmapped();
                Ok(())
            }
        }
    }

    fn release_all(&mut self) {
        let released = self.descs.drain(..).flatten().count();
        for _ in 0..released {
            self.stats.page_unmapped();
        }
    }
}

impl PageStore for HeapPages {
    fn with_page<R>(&mut self, page: BufferPage, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let desc = self.map(page)?;
        // SAFETY: free-list pages are never handed to callers, so nobody
        // else holds a view of these bytes while the source is borrowed.
        Ok(f(unsafe { desc.memory.bytes_mut() }))
    }

    fn sync(&mut self, _page: BufferPage) -> Result<()> {
        Ok(())
    }

    fn release(&mut self, page: BufferPage) -> Result<()> {
        match self.unmap(page) {
            Ok(()) | Err(Error::PageNotMapped(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for HeapPages {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// A page source living entirely in process memory.
///
/// Pages are never evicted: dropping a heap block would lose its content,
/// so [`fill_unmap_candidates`](PageSource::fill_unmap_candidates) offers
/// nothing.
pub struct MemorySource {
    source: BufferSource,
    pages: HeapPages,
    free_list: FreeList,
}

impl MemorySource {
    /// Create an empty source whose only page is the free-list head.
    pub fn new(source: BufferSource, page_size: u64, stats: Arc<BufferStats>) -> Result<Self> {
        let mut pages = HeapPages {
            page_size,
            descs: Vec::new(),
            stats,
        };
        let free_list = FreeList::create(&mut pages, page_size)?;
        debug!("loaded memory {}", source);

        Ok(Self {
            source,
            pages,
            free_list,
        })
    }

    /// Pages waiting on the free-list for reuse.
    pub fn free_page_count(&self) -> usize {
        self.free_list.free_page_count()
    }
}

impl PageSource for MemorySource {
    fn source(&self) -> BufferSource {
        self.source
    }

    fn file_name(&self) -> Option<&Path> {
        None
    }

    fn unload(&mut self) -> Result<()> {
        self.pages.release_all();
        debug!("unloaded memory {}", self.source);
        Ok(())
    }

    fn map_page(&mut self, page: BufferPage) -> Result<()> {
        self.pages.map(page).map(|_| ())
    }

    fn unmap_page(&mut self, page: BufferPage) -> Result<()> {
        self.pages.unmap(page)
    }

    fn lock_page(&mut self, page: BufferPage) -> Result<LockedPage> {
        self.free_list.check_allocated(page)?;
        let desc = self.pages.map(page)?;
        source::lock_desc(page, desc)
    }

    fn unlock_page(
        &mut self,
        page: BufferPage,
        locked: LockedPage,
        persist: bool,
    ) -> std::result::Result<(), UnlockError> {
        let stats = Arc::clone(&self.pages.stats);
        source::unlock_desc(page, self.pages.get_mut(page), locked, persist, &stats)
    }

    fn allocate_page(&mut self) -> Result<BufferPage> {
        self.free_list.allocate(&mut self.pages)
    }

    fn free_page(&mut self, page: BufferPage) -> Result<()> {
        self.free_list.check_allocated(page)?;
        if self.pages.get(page).is_some_and(|desc| desc.locked) {
            return Err(Error::PageLocked(page));
        }
        self.free_list.free(&mut self.pages, page)
    }

    fn fill_unmap_candidates(&self, _candidates: &mut Vec<UnmapCandidate>, _expect: usize) {}

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn total_page_count(&self) -> u64 {
        self.free_list.total_page_count()
    }

    fn mapped_page_count(&self) -> usize {
        self.pages.descs.iter().filter(|slot| slot.is_some()).count()
    }

    fn is_mapped(&self, page: BufferPage) -> bool {
        self.pages.get(page).is_some()
    }
}
