//! Buffer Manager - the façade over every loaded page source.
//!
//! The [`BufferManager`] provides:
//! - A registry of memory and file sources
//! - Page locking, allocation and freeing dispatched to the right source
//! - A global cache budget enforced by an inline eviction sweep
//! - Packing of `(page, offset)` pairs into 64-bit pointers

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, error, trace, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::buffer::eviction::{self, SweepPlan};
use crate::buffer::{BufferStats, PageGuard};
use crate::common::config::{round_page_size, BufferConfig};
use crate::common::error::UnlockError;
use crate::common::{BufferPage, BufferPointer, BufferSource, Error, PointerCodec, Result};
use crate::storage::{FileSource, LockedPage, MemorySource, PageSource, UnmapCandidate};

/// One registered source behind its own mutex.
struct SourceEntry {
    source: Mutex<Box<dyn PageSource>>,
}

impl SourceEntry {
    fn new(source: Box<dyn PageSource>) -> Self {
        Self {
            source: Mutex::new(source),
        }
    }

    /// The per-source exclusive region every page operation runs in.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, Box<dyn PageSource>> {
        self.source.lock()
    }
}

/// Loaded sources and the index generator.
#[derive(Default)]
struct Registry {
    entries: HashMap<u32, Arc<SourceEntry>>,
    next_index: u32,
}

/// Manages a set of page sources sharing one cache budget.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                       BufferManager                         │
/// │  ┌──────────────────────┐   ┌──────────────────────────┐    │
/// │  │ registry (RwLock)    │   │ stats: Arc<BufferStats>  │    │
/// │  │ u32 → Arc<Entry> ────┼─┐ │ cached_pages, clock      │    │
/// │  └──────────────────────┘ │ └────────────▲─────────────┘    │
/// │                           ▼              │ shared           │
/// │  ┌──────────────────────────────────────────────────────┐   │
/// │  │ Entry: Mutex<Box<dyn PageSource>>                    │   │
/// │  │   MemorySource (heap blocks) | FileSource (mmap)     │   │
/// │  └──────────────────────────────────────────────────────┘   │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `registry`: `RwLock`, held only for lookup, insert and remove
/// - each source: `Mutex`, held for one page operation
/// - `sweep`: `Mutex`, serializes eviction sweeps
/// - `stats`: no lock, all atomic counters
///
/// The registry lock is always released before a source lock is taken.
/// Locking a page never blocks: a page that is already locked fails with
/// [`Error::PageLocked`].
///
/// # Usage
/// ```
/// use pagebuf::BufferManager;
///
/// let bm = BufferManager::new(4096, 64);
/// let source = bm.load_memory_source().unwrap();
///
/// let page = bm.allocate_page(source).unwrap();
/// let mut locked = bm.lock_page(source, page).unwrap();
/// locked.as_mut_slice()[..4].copy_from_slice(b"data");
/// bm.unlock_page(source, page, locked, true).unwrap();
///
/// let pointer = bm.encode_pointer(page, 128).unwrap();
/// assert_eq!(bm.decode_pointer(pointer).unwrap(), (page, 128));
/// ```
pub struct BufferManager {
    /// Page size and pointer layout (immutable after construction).
    codec: PointerCodec,

    /// Maximum number of mapped pages across all sources.
    cache_page_count: u64,

    /// Loaded sources by index.
    registry: RwLock<Registry>,

    /// Shared with every source; holds the cached-page counter.
    stats: Arc<BufferStats>,

    /// Held for the duration of an eviction sweep.
    sweep: Mutex<()>,
}

impl BufferManager {
    /// Create a manager with the given page size and cache budget.
    ///
    /// `page_size` is rounded up to a multiple of the host page size, and a
    /// budget below one page is raised to one.
    pub fn new(page_size: u64, cache_page_count: u64) -> Self {
        let page_size = round_page_size(page_size);
        let cache_page_count = cache_page_count.max(1);
        debug!(
            "buffer manager: page size {}, cache budget {} pages",
            page_size, cache_page_count
        );

        Self {
            codec: PointerCodec::new(page_size),
            cache_page_count,
            registry: RwLock::new(Registry::default()),
            stats: Arc::new(BufferStats::new()),
            sweep: Mutex::new(()),
        }
    }

    pub fn with_config(config: BufferConfig) -> Self {
        Self::new(config.page_size, config.cache_page_count)
    }

    // ========================================================================
    // Public API: Sources
    // ========================================================================

    /// Load a new, empty source held in memory.
    ///
    /// # Errors
    /// - `Error::SourceIndexExhausted` if every source index has been used
    /// - `Error::Io` if the head page cannot be allocated
    pub fn load_memory_source(&self) -> Result<BufferSource> {
        let source = self.next_source()?;
        let backend = MemorySource::new(source, self.page_size(), Arc::clone(&self.stats))?;
        self.register(source, Box::new(backend));
        Ok(source)
    }

    /// Load a source backed by the file at `path`.
    ///
    /// With `create_new` the file is created (or truncated) and formatted;
    /// otherwise an existing file is opened and its free-list is read back.
    ///
    /// # Errors
    /// - `Error::Io` if the file cannot be opened or mapped
    /// - `Error::CorruptSource` if an existing file is malformed
    /// - `Error::SourceIndexExhausted` if every source index has been used
    pub fn load_file_source<P: AsRef<Path>>(
        &self,
        path: P,
        create_new: bool,
    ) -> Result<BufferSource> {
        let source = self.next_source()?;
        let backend = FileSource::open(
            source,
            path,
            self.page_size(),
            Arc::clone(&self.stats),
            create_new,
        )?;
        self.register(source, Box::new(backend));
        Ok(source)
    }

    /// Unload a source, releasing all its mappings.
    ///
    /// File sources flush their unlocked pages and close the file. Handles
    /// still held by callers stay valid but are no longer tracked.
    ///
    /// # Errors
    /// - `Error::SourceNotFound` if the source is not loaded
    /// - `Error::Io` if flushing fails (the source is unloaded regardless)
    pub fn unload_source(&self, source: BufferSource) -> Result<()> {
        let entry = self
            .registry
            .write()
            .entries
            .remove(&source.index)
            .ok_or(Error::SourceNotFound(source))?;

        let result = entry.lock().unload();
        debug!("unloaded {}", source);
        result
    }

    /// Backing file of a source, `None` for memory sources.
    ///
    /// # Errors
    /// - `Error::SourceNotFound` if the source is not loaded
    pub fn source_file_name(&self, source: BufferSource) -> Result<Option<PathBuf>> {
        let entry = self.entry(source)?;
        let backend = entry.lock();
        Ok(backend.file_name().map(Path::to_path_buf))
    }

    /// Number of pages in a source, free-list pages included.
    ///
    /// # Errors
    /// - `Error::SourceNotFound` if the source is not loaded
    pub fn total_page_count(&self, source: BufferSource) -> Result<u64> {
        Ok(self.entry(source)?.lock().total_page_count())
    }

    /// Synchronously write every unlocked mapped page of a source back.
    ///
    /// # Errors
    /// - `Error::SourceNotFound` if the source is not loaded
    /// - `Error::Io` if a flush fails
    pub fn flush_source(&self, source: BufferSource) -> Result<()> {
        self.entry(source)?.lock().flush()
    }

    // ========================================================================
    // Public API: Pages
    // ========================================================================

    /// Lock a page for exclusive access.
    ///
    /// Never blocks: if the page is already locked this fails at once.
    ///
    /// # Errors
    /// - `Error::SourceNotFound` if the source is not loaded
    /// - `Error::PageOutOfRange`, `Error::PageReserved` or
    ///   `Error::PageNotAllocated` if the page cannot be handed out
    /// - `Error::PageLocked` if another holder has the page
    pub fn lock_page(&self, source: BufferSource, page: BufferPage) -> Result<LockedPage> {
        let entry = self.entry(source)?;
        let result = entry.lock().lock_page(page);
        drop(entry);

        self.swap_cache_if_necessary();
        result
    }

    /// Give a locked page back, optionally flushing it to its file first.
    ///
    /// # Errors
    /// On failure the page stays locked and `locked` comes back inside the
    /// [`UnlockError`]:
    /// - `Error::SourceNotFound` if the source is not loaded
    /// - `Error::PageNotMapped` if the page has no mapping
    /// - `Error::AddressMismatch` if `locked` belongs to another mapping
    /// - `Error::PageNotLocked` if the page is not locked
    /// - `Error::Io` if the flush fails
    pub fn unlock_page(
        &self,
        source: BufferSource,
        page: BufferPage,
        locked: LockedPage,
        persist: bool,
    ) -> std::result::Result<(), UnlockError> {
        let result = self.unlock_in_source(source, page, locked, persist);
        self.swap_cache_if_necessary();
        result
    }

    /// [`unlock_page`](Self::unlock_page) without the sweep that follows.
    pub(crate) fn unlock_in_source(
        &self,
        source: BufferSource,
        page: BufferPage,
        locked: LockedPage,
        persist: bool,
    ) -> std::result::Result<(), UnlockError> {
        let entry = match self.entry(source) {
            Ok(entry) => entry,
            Err(e) => return Err(UnlockError::new(e, locked)),
        };
        let result = entry.lock().unlock_page(page, locked, persist);
        drop(entry);
        result
    }

    /// Lock a page and wrap it in a guard that unlocks on drop.
    ///
    /// # Errors
    /// Same as [`lock_page`](Self::lock_page).
    pub fn write_page(&self, source: BufferSource, page: BufferPage) -> Result<PageGuard<'_>> {
        let locked = self.lock_page(source, page)?;
        Ok(PageGuard::new(self, source, locked))
    }

    /// Allocate a page, reusing the most recently freed one if any.
    ///
    /// # Errors
    /// - `Error::SourceNotFound` if the source is not loaded
    /// - `Error::Io` if the source cannot grow
    pub fn allocate_page(&self, source: BufferSource) -> Result<BufferPage> {
        let entry = self.entry(source)?;
        let result = entry.lock().allocate_page();
        drop(entry);

        self.swap_cache_if_necessary();
        result
    }

    /// Return an unlocked page to its source's free-list.
    ///
    /// # Errors
    /// - `Error::SourceNotFound` if the source is not loaded
    /// - `Error::PageOutOfRange`, `Error::PageReserved` or
    ///   `Error::PageNotAllocated` if the page is not allocated
    /// - `Error::PageLocked` if the page is locked
    pub fn free_page(&self, source: BufferSource, page: BufferPage) -> Result<()> {
        let entry = self.entry(source)?;
        let result = entry.lock().free_page(page);
        drop(entry);

        self.swap_cache_if_necessary();
        result
    }

    // ========================================================================
    // Public API: Pointers
    // ========================================================================

    /// Pack a page and an offset within it into one pointer.
    ///
    /// # Errors
    /// - `Error::OffsetOutOfRange` if `offset >= page_size`
    /// - `Error::PageIndexOverflow` if the page index does not fit
    pub fn encode_pointer(&self, page: BufferPage, offset: u64) -> Result<BufferPointer> {
        self.codec.encode(page, offset)
    }

    /// Split a pointer back into its page and offset.
    ///
    /// # Errors
    /// - `Error::OffsetOutOfRange` if the pointer is invalid
    pub fn decode_pointer(&self, pointer: BufferPointer) -> Result<(BufferPage, u64)> {
        self.codec.decode(pointer)
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    #[inline]
    pub fn page_size(&self) -> u64 {
        self.codec.page_size()
    }

    #[inline]
    pub fn page_size_bits(&self) -> u32 {
        self.codec.page_size_bits()
    }

    #[inline]
    pub fn cache_page_count(&self) -> u64 {
        self.cache_page_count
    }

    /// Cache budget in bytes.
    #[inline]
    pub fn cache_size(&self) -> u64 {
        self.cache_page_count * self.page_size()
    }

    /// Pages currently mapped across all sources.
    #[inline]
    pub fn currently_cached_page_count(&self) -> u64 {
        self.stats.cached_pages()
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Number of loaded sources.
    pub fn source_count(&self) -> usize {
        self.registry.read().entries.len()
    }

    // ========================================================================
    // Internal: Eviction
    // ========================================================================

    /// Bring the cache back within budget if it has grown past it.
    ///
    /// Unmaps the least recently used unlocked pages across all sources
    /// until three quarters of the budget is reached.
    ///
    /// # Panics
    /// Panics if not enough pages could be unmapped to get back within
    /// budget, which happens when too many pages are locked or held by
    /// memory sources.
    pub fn swap_cache_if_necessary(&self) {
        let _sweep = self.sweep.lock();
        let cached = self.stats.cached_pages();
        let plan = match eviction::plan(cached, self.cache_page_count) {
            Some(plan) => plan,
            None => return,
        };
        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);

        let (victims, by_source) = self.collect_victims(plan.deficit);
        let reclaimed = self.unmap_victims(victims, &by_source);
        debug!(
            "sweep reclaimed {} of {} pages ({} cached, budget {})",
            reclaimed, plan.deficit, cached, self.cache_page_count
        );
        self.check_within_budget(plan, reclaimed);
    }

    /// The `deficit` oldest unlocked pages across every source, and the
    /// entries they belong to. Each source lock is released on return.
    fn collect_victims(
        &self,
        deficit: u64,
    ) -> (Vec<UnmapCandidate>, HashMap<u32, Arc<SourceEntry>>) {
        let entries: Vec<Arc<SourceEntry>> =
            self.registry.read().entries.values().cloned().collect();
        let expect = usize::try_from(deficit).unwrap_or(usize::MAX);
        let mut candidates = Vec::new();
        let mut by_source = HashMap::with_capacity(entries.len());
        for entry in entries {
            let source = {
                let backend = entry.lock();
                backend.fill_unmap_candidates(&mut candidates, expect);
                backend.source()
            };
            by_source.insert(source.index, entry);
        }
        (eviction::select_victims(candidates, deficit), by_source)
    }

    /// Unmap the victims and count how many are no longer mapped. A victim
    /// that was freed or unloaded since it was collected counts as
    /// reclaimed; one that was locked in the meantime does not.
    fn unmap_victims(
        &self,
        victims: Vec<UnmapCandidate>,
        by_source: &HashMap<u32, Arc<SourceEntry>>,
    ) -> u64 {
        let mut reclaimed = 0u64;
        for victim in victims {
            let Some(entry) = by_source.get(&victim.source.index) else {
                continue;
            };
            match entry.lock().unmap_page(victim.page) {
                Ok(()) => {
                    reclaimed += 1;
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!("evicted {} of {}", victim.page, victim.source);
                }
                Err(Error::PageNotMapped(_)) => {
                    reclaimed += 1;
                    trace!("{} of {} already unmapped", victim.page, victim.source);
                }
                Err(e) => warn!(
                    "could not evict {} of {}: {}",
                    victim.page, victim.source, e
                ),
            }
        }
        reclaimed
    }

    /// Panic if the sweep fell short of the overshoot and the live count is
    /// still over budget.
    fn check_within_budget(&self, plan: SweepPlan, reclaimed: u64) {
        let cached = self.stats.cached_pages();
        if reclaimed >= plan.overshoot || cached <= self.cache_page_count {
            return;
        }
        error!(
            "cache stuck over budget: {} cached, budget {}, only {} reclaimed",
            cached, self.cache_page_count, reclaimed
        );
        panic!(
            "buffer cache cannot be brought within {} pages ({} cached, {} reclaimed)",
            self.cache_page_count, cached, reclaimed
        );
    }

    // ========================================================================
    // Internal: Registry
    // ========================================================================

    /// Look up a source; the registry lock is released on return.
    fn entry(&self, source: BufferSource) -> Result<Arc<SourceEntry>> {
        self.registry
            .read()
            .entries
            .get(&source.index)
            .cloned()
            .ok_or(Error::SourceNotFound(source))
    }

    /// Hand out the next source index. Indices are never reused.
    fn next_source(&self) -> Result<BufferSource> {
        let mut registry = self.registry.write();
        let index = registry.next_index;
        if index == BufferSource::INVALID.index {
            return Err(Error::SourceIndexExhausted);
        }
        registry.next_index = index + 1;
        Ok(BufferSource::new(index))
    }

    fn register(&self, source: BufferSource, backend: Box<dyn PageSource>) {
        self.registry
            .write()
            .entries
            .insert(source.index, Arc::new(SourceEntry::new(backend)));
        debug!("registered {}", source);

        self.swap_cache_if_necessary();
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::with_config(BufferConfig::default())
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let entries: Vec<(u32, Arc<SourceEntry>)> =
            self.registry.get_mut().entries.drain().collect();
        for (index, entry) in entries {
            if let Err(e) = entry.lock().unload() {
                warn!("failed to unload {}: {}", BufferSource::new(index), e);
            }
        }
    }
}
