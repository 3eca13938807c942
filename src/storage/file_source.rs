//! File Source - pages mapped from a backing file.
//!
//! The [`FileSource`] maps each page on demand as its own `mmap` region:
//! ```text
//! ┌─────────┬─────────┬─────────┬─────────┬─────────┐
//! │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
//! │ (head)  │         │         │         │         │
//! └─────────┴─────────┴─────────┴─────────┴─────────┘
//! Offset:  0      P        2P      ...      N×P
//! ```
//!
//! Page N lives at file offset `N × page_size`. The file only grows one page
//! at a time, when the page at its current end is first mapped, so its
//! length is always a multiple of the page size.
//!
//! # Durability
//! Writes reach the file through the mapping. `unlock_page` with `persist`
//! set, `flush`, and every free-list update issue a synchronous `msync`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace, warn};
use memmap2::MmapOptions;

use crate::buffer::BufferStats;
use crate::common::error::UnlockError;
use crate::common::{BufferPage, BufferSource, Error, Result};
use crate::storage::free_list::{FreeList, PageStore};
use crate::storage::page_memory::{LockedPage, PageDesc, PageMemory};
use crate::storage::source::{self, PageSource, UnmapCandidate};

/// The open file and its current page mappings.
struct MappedPages {
    file: Option<File>,
    page_size: u64,
    descs: HashMap<u64, PageDesc>,
    stats: Arc<BufferStats>,
}

impl MappedPages {
    fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| Error::CorruptSource("file source is unloaded".into()))
    }

    fn map(&mut self, page: BufferPage) -> Result<&mut PageDesc> {
        let stamp = self.stats.tick();
        if !self.descs.contains_key(&page.index) {
            let memory = self.map_region(page)?;
            let desc = PageDesc::new(memory, page.index * self.page_size, stamp);
            self.descs.insert(page.index, desc);
            self.stats.page_mapped();
        }

        let desc = self
            .descs
            .get_mut(&page.index)
            .ok_or(Error::PageNotMapped(page))?;
        desc.last_access = stamp;
        Ok(desc)
    }

    /// Grow the file to cover `page` if it ends right before it, then map it.
    fn map_region(&self, page: BufferPage) -> Result<PageMemory> {
        let file = self.file()?;
        let offset = page
            .index
            .checked_mul(self.page_size)
            .ok_or(Error::PageIndexOverflow(page))?;
        let end = offset + self.page_size;

        let len = file.metadata()?.len();
        if len < end {
            if len != offset {
                warn!(
                    "file length {} leaves a gap before {} at offset {}",
                    len, page, offset
                );
                return Err(Error::CorruptSource(format!(
                    "file length {} is not page aligned before offset {}",
                    len, offset
                )));
            }
            file.set_len(end)?;
        }

        // SAFETY: MmapMut is unsafe because the file could be modified
        // externally while mapped. The source owns the file for its lifetime
        // and only ever maps each page once, so there are no aliasing views.
        let map = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(self.page_size as usize)
                .map_mut(file)?
        };
        trace!("mapped {} at offset {}", page, offset);
        Ok(PageMemory::mapped(map))
    }

    fn unmap(&mut self, page: BufferPage) -> Result<()> {
        match self.descs.get(&page.index) {
            None => return Err(Error::PageNotMapped(page)),
            Some(desc) if desc.locked => return Err(Error::PageLocked(page)),
            Some(_) => {}
        }
        if let Some(desc) = self.descs.remove(&page.index) {
            self.stats.page_unmapped();
            trace!("unmapped {} at offset {}", page, desc.offset);
        }
        Ok(())
    }

    /// `msync` every unlocked mapping.
    fn flush_unlocked(&self) -> Result<()> {
        for desc in self.descs.values().filter(|desc| !desc.locked) {
            desc.memory.flush()?;
            self.stats.page_flushed();
        }
        Ok(())
    }

    fn release_all(&mut self) {
        let released = self.descs.drain().count();
        for _ in 0..released {
            self.stats.page_unmapped();
        }
    }
}

impl PageStore for MappedPages {
    fn with_page<R>(&mut self, page: BufferPage, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let desc = self.map(page)?;
        // SAFETY: free-list pages are never handed to callers, so nobody
        // else holds a view of these bytes while the source is borrowed.
        Ok(f(unsafe { desc.memory.bytes_mut() }))
    }

    fn sync(&mut self, page: BufferPage) -> Result<()> {
        let desc = self
            .descs
            .get(&page.index)
            .ok_or(Error::PageNotMapped(page))?;
        desc.memory.flush()?;
        self.stats.page_flushed();
        Ok(())
    }

    fn release(&mut self, page: BufferPage) -> Result<()> {
        match self.unmap(page) {
            Ok(()) | Err(Error::PageNotMapped(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for MappedPages {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// A page source persisted in one file.
pub struct FileSource {
    source: BufferSource,
    path: PathBuf,
    pages: MappedPages,
    free_list: FreeList,
}

impl FileSource {
    /// Open the file at `path` as a page source.
    ///
    /// With `create_new` the file is created (or truncated) and formatted with
    /// a single free-list head page. Otherwise the file must exist, hold a
    /// whole number of pages, and carry a valid free-list chain.
    ///
    /// # Errors
    /// - `Error::Io` if the file cannot be opened, grown or mapped
    /// - `Error::CorruptSource` if an existing file is malformed
    pub fn open<P: AsRef<Path>>(
        source: BufferSource,
        path: P,
        page_size: u64,
        stats: Arc<BufferStats>,
        create_new: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = if create_new {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?
        } else {
            OpenOptions::new().read(true).write(true).open(&path)?
        };

        let len = file.metadata()?.len();
        let mut pages = MappedPages {
            file: Some(file),
            page_size,
            descs: HashMap::new(),
            stats,
        };

        let free_list = if create_new {
            FreeList::create(&mut pages, page_size)?
        } else {
            if len == 0 || len % page_size != 0 {
                warn!(
                    "{} has length {}, not a multiple of page size {}",
                    path.display(),
                    len,
                    page_size
                );
                return Err(Error::CorruptSource(format!(
                    "file length {} is not a positive multiple of page size {}",
                    len, page_size
                )));
            }
            FreeList::open(&mut pages, page_size, len / page_size)?
        };

        debug!(
            "loaded file {} from {} ({} pages)",
            source,
            path.display(),
            free_list.total_page_count()
        );

        Ok(Self {
            source,
            path,
            pages,
            free_list,
        })
    }

    /// Pages waiting on the free-list for reuse.
    pub fn free_page_count(&self) -> usize {
        self.free_list.free_page_count()
    }
}

impl PageSource for FileSource {
    fn source(&self) -> BufferSource {
        self.source
    }

    fn file_name(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn unload(&mut self) -> Result<()> {
        let flushed = self.pages.flush_unlocked();
        self.pages.release_all();
        if let Some(file) = self.pages.file.take() {
            file.sync_all()?;
        }
        debug!("unloaded file {} ({})", self.source, self.path.display());
        flushed
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
        source::unlock_desc(page, self.pages.descs.get_mut(&page.index), locked, persist, &stats)
    }

    fn allocate_page(&mut self) -> Result<BufferPage> {
        self.free_list.allocate(&mut self.pages)
    }

    fn free_page(&mut self, page: BufferPage) -> Result<()> {
        self.free_list.check_allocated(page)?;
        if self
            .pages
            .descs
            .get(&page.index)
            .is_some_and(|desc| desc.locked)
        {
            return Err(Error::PageLocked(page));
        }
        self.free_list.free(&mut self.pages, page)
    }

    fn fill_unmap_candidates(&self, candidates: &mut Vec<UnmapCandidate>, expect: usize) {
        let unlocked = self
            .pages
            .descs
            .iter()
            .filter(|(_, desc)| !desc.locked)
            .map(|(&index, desc)| (BufferPage::new(index), desc.last_access))
            .collect();
        source::push_candidates(self.source, unlocked, candidates, expect);
    }

    fn flush(&mut self) -> Result<()> {
        self.pages.flush_unlocked()
    }

    fn total_page_count(&self) -> u64 {
        self.free_list.total_page_count()
    }

    fn mapped_page_count(&self) -> usize {
        self.pages.descs.len()
    }

    fn is_mapped(&self, page: BufferPage) -> bool {
        self.pages.descs.contains_key(&page.index)
    }
}
