//! Free-list management embedded in the pages of a source.
//!
//! Every source keeps its free-list inside its own pages, so no side file
//! is needed. Page 0 is the head of a chain of free-list pages; each one
//! stores a stack of reclaimed page indices.
//!
//! ## Free-List Page Layout
//!
//! ```text
//! Offset  Size      Description
//! ------  --------  ----------------------------------------------
//! 0       8         total_page_count (head page only, else 0)
//! 8       8         next_free_list_page (u64::MAX terminates)
//! 16      8         available_item_count
//! 24      8*N       available items: free page indices (stack)
//! ```
//!
//! All words are little-endian. With 64KB pages each free-list page holds
//! (65536 - 24) / 8 = 8189 items.
//!
//! ## Chain Shape
//!
//! Every chain page before the terminal one is full, so the whole chain
//! behaves as one stack:
//!
//! - Freeing pushes onto the terminal page. When it is full, the page being
//!   freed becomes the new terminal page, holding zero items.
//! - Allocating pops from the terminal page. An empty terminal page other
//!   than page 0 is unlinked and handed out itself.
//! - When page 0 is empty, the source grows by one page.
//!
//! Pages therefore come back in exactly the reverse order they were freed,
//! and emptied chain pages never linger.
//!
//! ## In-Memory Mirror
//!
//! [`FreeList`] caches the chain and the set of free indices so that lock
//! and free requests can be validated without touching page bytes. The
//! bytes stay authoritative; the mirror is rebuilt by walking the chain when
//! a file source is reopened.

use std::collections::HashSet;

use log::trace;

use crate::common::{BufferPage, Error, Result};

const WORD_SIZE: usize = 8;
const WORD_TOTAL_PAGE_COUNT: usize = 0;
const WORD_NEXT_PAGE: usize = 1;
const WORD_ITEM_COUNT: usize = 2;
const WORD_ITEM_BEGIN: usize = 3;

/// Page access the free-list needs from a source.
pub(crate) trait PageStore {
    /// Run `f` over the bytes of `page`, mapping it first.
    ///
    /// Mapping the page one past the current end grows the source.
    fn with_page<R>(&mut self, page: BufferPage, f: impl FnOnce(&mut [u8]) -> R) -> Result<R>;

    /// Make free-list words written to `page` durable.
    fn sync(&mut self, page: BufferPage) -> Result<()>;

    /// Drop the contents of a page that now sits in the free-list.
    fn release(&mut self, page: BufferPage) -> Result<()>;
}

/// Typed view of the free-list words at the start of a page.
pub(crate) struct FreeListPage<'a> {
    bytes: &'a mut [u8],
}

impl<'a> FreeListPage<'a> {
    pub(crate) fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Number of item slots after the header for `page_size` byte pages.
    pub(crate) fn capacity(page_size: u64) -> u64 {
        (page_size / WORD_SIZE as u64).saturating_sub(WORD_ITEM_BEGIN as u64)
    }

    fn word(&self, index: usize) -> u64 {
        let start = index * WORD_SIZE;
        let mut buf = [0u8; WORD_SIZE];
        buf.copy_from_slice(&self.bytes[start..start + WORD_SIZE]);
        u64::from_le_bytes(buf)
    }

    fn set_word(&mut self, index: usize, value: u64) {
        let start = index * WORD_SIZE;
        self.bytes[start..start + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn total_page_count(&self) -> u64 {
        self.word(WORD_TOTAL_PAGE_COUNT)
    }

    pub(crate) fn set_total_page_count(&mut self, count: u64) {
        self.set_word(WORD_TOTAL_PAGE_COUNT, count);
    }

    pub(crate) fn next(&self) -> BufferPage {
        BufferPage::new(self.word(WORD_NEXT_PAGE))
    }

    pub(crate) fn set_next(&mut self, page: BufferPage) {
        self.set_word(WORD_NEXT_PAGE, page.index);
    }

    pub(crate) fn item_count(&self) -> u64 {
        self.word(WORD_ITEM_COUNT)
    }

    pub(crate) fn set_item_count(&mut self, count: u64) {
        self.set_word(WORD_ITEM_COUNT, count);
    }

    pub(crate) fn item(&self, slot: u64) -> u64 {
        self.word(WORD_ITEM_BEGIN + slot as usize)
    }

    pub(crate) fn set_item(&mut self, slot: u64, page: u64) {
        self.set_word(WORD_ITEM_BEGIN + slot as usize, page);
    }

    /// Write the header of an empty, terminal free-list page.
    pub(crate) fn init(&mut self, total_page_count: u64) {
        self.set_total_page_count(total_page_count);
        self.set_next(BufferPage::INVALID);
        self.set_item_count(0);
    }
}

/// In-memory mirror of a source's free-list.
#[derive(Debug)]
pub(crate) struct FreeList {
    capacity: u64,
    total_page_count: u64,
    /// Free-list pages from the head (page 0) to the terminal page.
    chain: Vec<BufferPage>,
    /// Free items plus every chain page except the head.
    free: HashSet<u64>,
}

impl FreeList {
    /// Format page 0 of a brand new source.
    pub(crate) fn create<S: PageStore>(store: &mut S, page_size: u64) -> Result<Self> {
        store.with_page(BufferPage::HEAD, |bytes| {
            bytes.fill(0);
            FreeListPage::new(bytes).init(1);
        })?;
        store.sync(BufferPage::HEAD)?;

        Ok(Self {
            capacity: FreeListPage::capacity(page_size),
            total_page_count: 1,
            chain: vec![BufferPage::HEAD],
            free: HashSet::new(),
        })
    }

    /// Rebuild the mirror of an existing source by walking its chain.
    ///
    /// `available_pages` is how many pages the backing storage holds.
    ///
    /// # Errors
    /// `Error::CorruptSource` if the header or the chain is inconsistent.
    pub(crate) fn open<S: PageStore>(
        store: &mut S,
        page_size: u64,
        available_pages: u64,
    ) -> Result<Self> {
        let capacity = FreeListPage::capacity(page_size);
        let total_page_count =
            store.with_page(BufferPage::HEAD, |bytes| FreeListPage::new(bytes).total_page_count())?;
        if total_page_count == 0 || total_page_count > available_pages {
            return Err(Error::CorruptSource(format!(
                "total page count {} does not fit {} stored pages",
                total_page_count, available_pages
            )));
        }

        let mut chain = Vec::new();
        let mut free = HashSet::new();
        let mut current = BufferPage::HEAD;

        while current.is_valid() {
            if chain.len() as u64 >= total_page_count {
                return Err(Error::CorruptSource("free-list chain has a cycle".into()));
            }
            chain.push(current);

            let (next, items) = store.with_page(current, |bytes| {
                let view = FreeListPage::new(bytes);
                let count = view.item_count();
                if count > capacity {
                    return None;
                }
                let items: Vec<u64> = (0..count).map(|slot| view.item(slot)).collect();
                Some((view.next(), items))
            })?
            .ok_or_else(|| {
                Error::CorruptSource(format!("{} holds more items than fit", current))
            })?;

            for item in items {
                if item == BufferPage::HEAD.index || item >= total_page_count || !free.insert(item) {
                    return Err(Error::CorruptSource(format!(
                        "invalid free page {} in {}",
                        item, current
                    )));
                }
            }

            if next.is_valid()
                && (next == BufferPage::HEAD
                    || next.index >= total_page_count
                    || !free.insert(next.index))
            {
                return Err(Error::CorruptSource(format!(
                    "invalid free-list link from {} to {}",
                    current, next
                )));
            }
            current = next;
        }

        Ok(Self {
            capacity,
            total_page_count,
            chain,
            free,
        })
    }

    #[inline]
    pub(crate) fn total_page_count(&self) -> u64 {
        self.total_page_count
    }

    /// Number of pages waiting for reuse, chain pages included.
    #[inline]
    pub(crate) fn free_page_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub(crate) fn is_free(&self, page: BufferPage) -> bool {
        self.free.contains(&page.index)
    }

    /// Check that `page` is handed out to a caller.
    pub(crate) fn check_allocated(&self, page: BufferPage) -> Result<()> {
        if page.index >= self.total_page_count {
            return Err(Error::PageOutOfRange {
                page,
                total: self.total_page_count,
            });
        }
        if page == BufferPage::HEAD {
            return Err(Error::PageReserved(page));
        }
        if self.is_free(page) {
            return Err(Error::PageNotAllocated(page));
        }
        Ok(())
    }

    /// Take a page for a caller: reuse the most recently freed one, or grow.
    pub(crate) fn allocate<S: PageStore>(&mut self, store: &mut S) -> Result<BufferPage> {
        let terminal = self.terminal();
        let popped = store.with_page(terminal, |bytes| {
            let mut view = FreeListPage::new(bytes);
            let count = view.item_count();
            if count == 0 {
                return None;
            }
            view.set_item_count(count - 1);
            Some(BufferPage::new(view.item(count - 1)))
        })?;

        if let Some(page) = popped {
            store.sync(terminal)?;
            self.free.remove(&page.index);
            trace!("reused {} from free-list {}", page, terminal);
            return Ok(page);
        }

        if terminal != BufferPage::HEAD {
            let previous = self.chain[self.chain.len() - 2];
            store.with_page(previous, |bytes| {
                FreeListPage::new(bytes).set_next(BufferPage::INVALID)
            })?;
            store.sync(previous)?;

            // Reused pages never carry free-list words.
            store.with_page(terminal, |bytes| bytes.fill(0))?;
            store.sync(terminal)?;

            self.chain.pop();
            self.free.remove(&terminal.index);
            trace!("reused empty free-list {}", terminal);
            return Ok(terminal);
        }

        self.append(store)
    }

    /// Put an allocated page back. The caller has already checked that it is
    /// allocated and unlocked.
    pub(crate) fn free<S: PageStore>(&mut self, store: &mut S, page: BufferPage) -> Result<()> {
        let terminal = self.terminal();
        let capacity = self.capacity;
        let pushed = store.with_page(terminal, |bytes| {
            let mut view = FreeListPage::new(bytes);
            let count = view.item_count();
            if count >= capacity {
                return false;
            }
            view.set_item(count, page.index);
            view.set_item_count(count + 1);
            true
        })?;

        if pushed {
            store.sync(terminal)?;
            self.free.insert(page.index);
            trace!("pushed {} onto free-list {}", page, terminal);
            return store.release(page);
        }

        // The terminal page is full: the freed page extends the chain.
        store.with_page(page, |bytes| FreeListPage::new(bytes).init(0))?;
        store.sync(page)?;
        store.with_page(terminal, |bytes| FreeListPage::new(bytes).set_next(page))?;
        store.sync(terminal)?;

        self.chain.push(page);
        self.free.insert(page.index);
        trace!("{} became free-list page after {}", page, terminal);
        Ok(())
    }

    fn append<S: PageStore>(&mut self, store: &mut S) -> Result<BufferPage> {
        let page = BufferPage::new(self.total_page_count);
        store.with_page(page, |_| ())?;

        let total = self.total_page_count + 1;
        store.with_page(BufferPage::HEAD, |bytes| {
            FreeListPage::new(bytes).set_total_page_count(total)
        })?;
        store.sync(BufferPage::HEAD)?;

        self.total_page_count = total;
        trace!("appended {}", page);
        Ok(page)
    }

    fn terminal(&self) -> BufferPage {
        self.chain.last().copied().unwrap_or(BufferPage::HEAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: u64 = 64;

    /// Vec-backed store that records syncs and releases.
    #[derive(Default)]
    struct VecStore {
        pages: Vec<Vec<u8>>,
        synced: Vec<BufferPage>,
        released: Vec<BufferPage>,
    }

    impl PageStore for VecStore {
        fn with_page<R>(&mut self, page: BufferPage, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
            let index = page.index as usize;
            if index == self.pages.len() {
                self.pages.push(vec![0; PAGE_SIZE as usize]);
            }
            match self.pages.get_mut(index) {
                Some(bytes) => Ok(f(bytes)),
                None => Err(Error::PageNotMapped(page)),
            }
        }

        fn sync(&mut self, page: BufferPage) -> Result<()> {
            self.synced.push(page);
            Ok(())
        }

        fn release(&mut self, page: BufferPage) -> Result<()> {
            self.released.push(page);
            Ok(())
        }
    }

    fn new_list() -> (FreeList, VecStore) {
        let mut store = VecStore::default();
        let list = FreeList::create(&mut store, PAGE_SIZE).unwrap();
        (list, store)
    }

    #[test]
    fn test_capacity() {
        assert_eq!(FreeListPage::capacity(65536), 8189);
        assert_eq!(FreeListPage::capacity(PAGE_SIZE), 5);
        assert_eq!(FreeListPage::capacity(16), 0);
    }

    #[test]
    fn test_view_fields() {
        let mut bytes = vec![0u8; PAGE_SIZE as usize];
        let mut view = FreeListPage::new(&mut bytes);
        view.init(9);
        view.set_item(0, 42);
        view.set_item_count(1);

        assert_eq!(view.total_page_count(), 9);
        assert_eq!(view.next(), BufferPage::INVALID);
        assert_eq!(view.item_count(), 1);
        assert_eq!(view.item(0), 42);
        assert_eq!(&bytes[24..32], &42u64.to_le_bytes());
    }

    #[test]
    fn test_create_formats_head() {
        let (list, mut store) = new_list();
        assert_eq!(list.total_page_count(), 1);
        assert_eq!(store.synced, vec![BufferPage::HEAD]);

        let (total, next, count) = store
            .with_page(BufferPage::HEAD, |b| {
                let view = FreeListPage::new(b);
                (view.total_page_count(), view.next(), view.item_count())
            })
            .unwrap();
        assert_eq!((total, next, count), (1, BufferPage::INVALID, 0));
    }

    #[test]
    fn test_allocate_appends_distinct_pages() {
        let (mut list, mut store) = new_list();
        let pages: Vec<u64> = (0..10)
            .map(|_| list.allocate(&mut store).unwrap().index)
            .collect();
        assert_eq!(pages, (1..=10).collect::<Vec<_>>());
        assert_eq!(list.total_page_count(), 11);
    }

    #[test]
    fn test_lifo_reuse() {
        let (mut list, mut store) = new_list();
        let p1 = list.allocate(&mut store).unwrap();
        let _p2 = list.allocate(&mut store).unwrap();

        list.free(&mut store, p1).unwrap();
        assert!(list.is_free(p1));
        assert_eq!(store.released, vec![p1]);

        assert_eq!(list.allocate(&mut store).unwrap(), p1);
        assert!(!list.is_free(p1));
    }

    #[test]
    fn test_chain_grows_and_shrinks_in_stack_order() {
        let (mut list, mut store) = new_list();
        let pages: Vec<BufferPage> = (0..40).map(|_| list.allocate(&mut store).unwrap()).collect();

        for &page in &pages {
            list.free(&mut store, page).unwrap();
        }
        // 5 items per page: head holds 5, then every sixth page links a new chain page.
        assert!(list.chain.len() > 1);
        assert_eq!(list.free_page_count(), 40);

        let reused: Vec<BufferPage> = (0..40).map(|_| list.allocate(&mut store).unwrap()).collect();
        let expected: Vec<BufferPage> = pages.iter().rev().copied().collect();
        assert_eq!(reused, expected);
        assert_eq!(list.chain, vec![BufferPage::HEAD]);
        assert_eq!(list.total_page_count(), 41);

        // Everything reused, the next one grows the source.
        assert_eq!(list.allocate(&mut store).unwrap(), BufferPage::new(41));
    }

    #[test]
    fn test_emptied_chain_page_is_zeroed_on_reuse() {
        let (mut list, mut store) = new_list();
        let pages: Vec<BufferPage> = (0..7).map(|_| list.allocate(&mut store).unwrap()).collect();
        for &page in &pages {
            list.free(&mut store, page).unwrap();
        }
        // Head holds five items; the sixth freed page links the chain.
        assert_eq!(list.chain, vec![BufferPage::HEAD, pages[5]]);

        assert_eq!(list.allocate(&mut store).unwrap(), pages[6]);
        assert_eq!(list.allocate(&mut store).unwrap(), pages[5]);
        assert_eq!(list.chain, vec![BufferPage::HEAD]);

        let zeroed = store
            .with_page(pages[5], |bytes| bytes.iter().all(|&b| b == 0))
            .unwrap();
        assert!(zeroed);
    }

    #[test]
    fn test_check_allocated() {
        let (mut list, mut store) = new_list();
        let page = list.allocate(&mut store).unwrap();

        assert!(list.check_allocated(page).is_ok());
        assert!(matches!(
            list.check_allocated(BufferPage::HEAD),
            Err(Error::PageReserved(_))
        ));
        assert!(matches!(
            list.check_allocated(BufferPage::new(99)),
            Err(Error::PageOutOfRange { total: 2, .. })
        ));

        list.free(&mut store, page).unwrap();
        assert!(matches!(
            list.check_allocated(page),
            Err(Error::PageNotAllocated(_))
        ));
    }

    #[test]
    fn test_open_rebuilds_mirror() {
        let (mut list, mut store) = new_list();
        let pages: Vec<BufferPage> = (0..12).map(|_| list.allocate(&mut store).unwrap()).collect();
        for &page in &pages[..8] {
            list.free(&mut store, page).unwrap();
        }

        let total = store.pages.len() as u64;
        let reopened = FreeList::open(&mut store, PAGE_SIZE, total).unwrap();
        assert_eq!(reopened.total_page_count(), list.total_page_count());
        assert_eq!(reopened.chain, list.chain);
        assert_eq!(reopened.free, list.free);
    }

    #[test]
    fn test_open_rejects_cycle() {
        let (mut list, mut store) = new_list();
        let pages: Vec<BufferPage> = (0..8).map(|_| list.allocate(&mut store).unwrap()).collect();
        for &page in &pages {
            list.free(&mut store, page).unwrap();
        }
        let tail = *list.chain.last().unwrap();
        store
            .with_page(tail, |b| FreeListPage::new(b).set_next(tail))
            .unwrap();

        let total = store.pages.len() as u64;
        assert!(matches!(
            FreeList::open(&mut store, PAGE_SIZE, total),
            Err(Error::CorruptSource(_))
        ));
    }

    #[test]
    fn test_open_rejects_bad_total() {
        let (_list, mut store) = new_list();
        store
            .with_page(BufferPage::HEAD, |b| FreeListPage::new(b).set_total_page_count(50))
            .unwrap();
        assert!(matches!(
            FreeList::open(&mut store, PAGE_SIZE, 1),
            Err(Error::CorruptSource(_))
        ));
    }
}
