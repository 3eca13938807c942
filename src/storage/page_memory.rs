//! Page memory, page descriptors, and the handle given out by `lock_page`.
//!
//! A page's bytes live either in a heap block (memory sources) or in a
//! one-page `mmap` region (file sources). Both are wrapped in
//! [`PageMemory`] and shared through an `Arc`:
//!
//! ```text
//!  source (under its mutex)            caller
//!  ┌──────────────────────────┐        ┌──────────────┐
//!  │ PageDesc                 │        │ LockedPage   │
//!  │  memory ─────────────────┼──┬────▶│  memory      │
//!  │  locked = true           │  │     └──────────────┘
//!  └──────────────────────────┘  ▼
//!                          PageMemory (heap | mmap)
//! ```
//!
//! The `locked` flag in the descriptor is the exclusive-access token. While
//! it is set the source never touches the bytes, and exactly one
//! [`LockedPage`] exists for the page. Because the handle holds its own
//! reference, unloading a source never leaves it dangling.

use std::cell::UnsafeCell;
use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

use memmap2::MmapMut;

use crate::common::BufferPage;

enum Backing {
    Heap(Box<[u8]>),
    Mapped(MmapMut),
}

/// Owned bytes of one mapped page.
pub(crate) struct PageMemory {
    backing: UnsafeCell<Backing>,
    /// Start of the bytes; only used for identity comparison.
    address: NonNull<u8>,
    len: usize,
}

// SAFETY: the bytes are only reached through `bytes`/`bytes_mut`, whose
// callers guarantee exclusive access (the page lock for `LockedPage`, the
// source mutex with the page unlocked for the sources).
unsafe impl Send for PageMemory {}
unsafe impl Sync for PageMemory {}

impl PageMemory {
    /// Allocate a zeroed heap block of `len` bytes.
    ///
    /// Reports allocation failure instead of aborting.
    pub(crate) fn heap(len: usize) -> io::Result<Self> {
        let mut block = Vec::new();
        block
            .try_reserve_exact(len)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        block.resize(len, 0);

        let mut block = block.into_boxed_slice();
        let address = NonNull::new(block.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Ok(Self {
            backing: UnsafeCell::new(Backing::Heap(block)),
            address,
            len,
        })
    }

    /// Wrap a one-page file mapping.
    pub(crate) fn mapped(mut map: MmapMut) -> Self {
        let len = map.len();
        let address = NonNull::new(map.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            backing: UnsafeCell::new(Backing::Mapped(map)),
            address,
            len,
        }
    }

    #[inline]
    pub(crate) fn address(&self) -> NonNull<u8> {
        self.address
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// No mutable view of these bytes may be alive.
    pub(crate) unsafe fn bytes(&self) -> &[u8] {
        match &*self.backing.get() {
            Backing::Heap(block) => block,
            Backing::Mapped(map) => map,
        }
    }

    /// # Safety
    /// The caller must hold exclusive access to the page: either its lock
    /// token, or the source mutex while the page is unlocked.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self) -> &mut [u8] {
        match &mut *self.backing.get() {
            Backing::Heap(block) => block,
            Backing::Mapped(map) => map,
        }
    }

    /// Synchronously write the page back to its file (`msync`).
    ///
    /// Heap pages have nowhere to go and succeed immediately. Must not be
    /// called while a [`LockedPage`] for this memory is alive.
    pub(crate) fn flush(&self) -> io::Result<()> {
        // SAFETY: no caller-visible view exists (see above), and the shared
        // borrow only reads the mapping's bookkeeping.
        match unsafe { &*self.backing.get() } {
            Backing::Heap(_) => Ok(()),
            Backing::Mapped(map) => map.flush(),
        }
    }

    #[inline]
    pub(crate) fn is_mapped_file(&self) -> bool {
        // SAFETY: only the enum tag is inspected.
        matches!(unsafe { &*self.backing.get() }, Backing::Mapped(_))
    }
}

/// Descriptor of one mapped page, owned by its source.
pub(crate) struct PageDesc {
    pub(crate) memory: Arc<PageMemory>,
    /// Byte offset of the page within its source.
    pub(crate) offset: u64,
    pub(crate) locked: bool,
    pub(crate) last_access: u64,
}

impl PageDesc {
    pub(crate) fn new(memory: PageMemory, offset: u64, last_access: u64) -> Self {
        Self {
            memory: Arc::new(memory),
            offset,
            locked: false,
            last_access,
        }
    }
}

/// Exclusive access to one page's bytes.
///
/// Returned by [`BufferManager::lock_page`](crate::BufferManager::lock_page)
/// and consumed by
/// [`BufferManager::unlock_page`](crate::BufferManager::unlock_page). Only one
/// handle per page exists at a time. Dropping a handle without unlocking
/// leaves the page locked.
///
/// # Example
/// ```
/// use pagebuf::BufferManager;
///
/// let bm = BufferManager::new(4096, 16);
/// let source = bm.load_memory_source().unwrap();
/// let page = bm.allocate_page(source).unwrap();
///
/// let mut locked = bm.lock_page(source, page).unwrap();
/// locked.as_mut_slice()[0] = 0xAB;
/// bm.unlock_page(source, page, locked, true).unwrap();
/// ```
pub struct LockedPage {
    page: BufferPage,
    memory: Arc<PageMemory>,
}

impl LockedPage {
    pub(crate) fn new(page: BufferPage, memory: Arc<PageMemory>) -> Self {
        Self { page, memory }
    }

    /// The page this handle grants access to.
    #[inline]
    pub fn page(&self) -> BufferPage {
        self.page
    }

    /// Raw start address of the page's bytes.
    #[inline]
    pub fn address(&self) -> NonNull<u8> {
        self.memory.address()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: this handle is the page's lock token, so the source does
        // not touch the bytes and no other handle exists.
        unsafe { self.memory.bytes() }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` rules out other views via this handle.
        unsafe { self.memory.bytes_mut() }
    }
}

impl fmt::Debug for LockedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedPage")
            .field("page", &self.page)
            .field("address", &self.address())
            .field("len", &self.len())
            .finish()
    }
}
