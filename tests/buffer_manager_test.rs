//! Buffer Manager Tests
//!
//! Page lifecycle rules exercised through the public API, once per backend
//! where the behavior is shared.

use pagebuf::{BufferManager, BufferPage, BufferSource, Error};
use tempfile::{tempdir, TempDir};

const PAGE_SIZE: u64 = 4096;
const CACHE_PAGES: u64 = 64;

fn create_bm() -> BufferManager {
    BufferManager::new(PAGE_SIZE, CACHE_PAGES)
}

/// Load one memory source and one file source on the same manager.
fn load_both(bm: &BufferManager) -> (Vec<BufferSource>, TempDir) {
    let dir = tempdir().unwrap();
    let memory = bm.load_memory_source().unwrap();
    let file = bm
        .load_file_source(dir.path().join("test.db"), true)
        .unwrap();
    (vec![memory, file], dir)
}

/// Helper to write a string to page data.
fn copy_string(data: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    data[..bytes.len()].copy_from_slice(bytes);
    data[bytes.len()] = 0;
}

/// Helper to read a null-terminated string from page data.
fn read_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn test_fresh_allocations_are_distinct() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let mut pages: Vec<BufferPage> = (0..20)
            .map(|_| bm.allocate_page(source).unwrap())
            .collect();
        assert!(pages.iter().all(|p| p.is_valid() && *p != BufferPage::HEAD));

        pages.sort();
        pages.dedup();
        assert_eq!(pages.len(), 20);
        assert_eq!(bm.total_page_count(source).unwrap(), 21);
    }
}

#[test]
fn test_lifo_reuse() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let p1 = bm.allocate_page(source).unwrap();
        let p2 = bm.allocate_page(source).unwrap();
        assert_ne!(p1, p2);

        bm.free_page(source, p1).unwrap();
        assert_eq!(bm.allocate_page(source).unwrap(), p1);

        bm.free_page(source, p1).unwrap();
        bm.free_page(source, p2).unwrap();
        assert_eq!(bm.allocate_page(source).unwrap(), p2);
        assert_eq!(bm.allocate_page(source).unwrap(), p1);
    }
}

#[test]
fn test_head_page_is_reserved() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        assert!(matches!(
            bm.lock_page(source, BufferPage::HEAD),
            Err(Error::PageReserved(_))
        ));
        assert!(matches!(
            bm.free_page(source, BufferPage::HEAD),
            Err(Error::PageReserved(_))
        ));
    }
}

#[test]
fn test_page_beyond_total_is_out_of_range() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let page = bm.allocate_page(source).unwrap();
        let beyond = BufferPage::new(page.index + 1);
        assert!(matches!(
            bm.lock_page(source, beyond),
            Err(Error::PageOutOfRange { .. })
        ));
        assert!(matches!(
            bm.free_page(source, beyond),
            Err(Error::PageOutOfRange { .. })
        ));
    }
}

// ============================================================================
// Locking
// ============================================================================

#[test]
fn test_double_lock_fails() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let page = bm.allocate_page(source).unwrap();
        let locked = bm.lock_page(source, page).unwrap();

        assert!(matches!(
            bm.lock_page(source, page),
            Err(Error::PageLocked(_))
        ));

        bm.unlock_page(source, page, locked, false).unwrap();
        let locked = bm.lock_page(source, page).unwrap();
        bm.unlock_page(source, page, locked, false).unwrap();
    }
}

#[test]
fn test_unlock_with_wrong_handle_fails() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let a = bm.allocate_page(source).unwrap();
        let b = bm.allocate_page(source).unwrap();
        let locked_a = bm.lock_page(source, a).unwrap();
        let locked_b = bm.lock_page(source, b).unwrap();

        // Handle of `a` presented for `b`.
        let err = bm.unlock_page(source, b, locked_a, false).unwrap_err();
        assert!(matches!(err.error, Error::AddressMismatch(_)));
        let (_, locked_a) = err.into_parts();

        // Both pages are still locked.
        assert!(matches!(bm.lock_page(source, a), Err(Error::PageLocked(_))));
        assert!(matches!(bm.lock_page(source, b), Err(Error::PageLocked(_))));

        bm.unlock_page(source, a, locked_a, false).unwrap();
        bm.unlock_page(source, b, locked_b, false).unwrap();
    }
}

#[test]
fn test_unlock_of_unlocked_page_fails() {
    let bm = create_bm();
    let source = bm.load_memory_source().unwrap();
    let a = bm.allocate_page(source).unwrap();
    let b = bm.allocate_page(source).unwrap();

    // Map `b` unlocked by taking and returning its lock.
    let locked_b = bm.lock_page(source, b).unwrap();
    bm.unlock_page(source, b, locked_b, false).unwrap();

    let locked_a = bm.lock_page(source, a).unwrap();
    let err = bm.unlock_page(source, b, locked_a, false).unwrap_err();
    // The handle of `a` can never match `b`'s mapping.
    assert!(matches!(err.error, Error::AddressMismatch(_)));

    let (_, locked_a) = err.into_parts();
    bm.unlock_page(source, a, locked_a, false).unwrap();
}

// ============================================================================
// Freeing
// ============================================================================

#[test]
fn test_free_locked_page_fails() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let page = bm.allocate_page(source).unwrap();
        let locked = bm.lock_page(source, page).unwrap();

        assert!(matches!(
            bm.free_page(source, page),
            Err(Error::PageLocked(_))
        ));
        bm.unlock_page(source, page, locked, false).unwrap();
        bm.free_page(source, page).unwrap();
    }
}

#[test]
fn test_freed_page_is_not_lockable_until_reallocated() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let page = bm.allocate_page(source).unwrap();
        bm.free_page(source, page).unwrap();

        assert!(matches!(
            bm.lock_page(source, page),
            Err(Error::PageNotAllocated(_))
        ));
        assert!(matches!(
            bm.free_page(source, page),
            Err(Error::PageNotAllocated(_))
        ));

        assert_eq!(bm.allocate_page(source).unwrap(), page);
        let locked = bm.lock_page(source, page).unwrap();
        bm.unlock_page(source, page, locked, false).unwrap();
    }
}

// ============================================================================
// Content
// ============================================================================

#[test]
fn test_write_persist_relock_round_trip() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for (i, &source) in sources.iter().enumerate() {
        let text = format!("Hello from source {}", i);
        let page = bm.allocate_page(source).unwrap();

        let mut locked = bm.lock_page(source, page).unwrap();
        assert_eq!(locked.len() as u64, bm.page_size());
        copy_string(locked.as_mut_slice(), &text);
        bm.unlock_page(source, page, locked, true).unwrap();

        let locked = bm.lock_page(source, page).unwrap();
        assert_eq!(read_string(locked.as_slice()), text);
        bm.unlock_page(source, page, locked, false).unwrap();
    }
}

#[test]
fn test_pages_do_not_overlap() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let pages: Vec<BufferPage> = (0..8)
            .map(|_| bm.allocate_page(source).unwrap())
            .collect();
        for &page in &pages {
            let mut locked = bm.lock_page(source, page).unwrap();
            locked.as_mut_slice().fill(page.index as u8);
            bm.unlock_page(source, page, locked, true).unwrap();
        }
        for &page in &pages {
            let locked = bm.lock_page(source, page).unwrap();
            assert!(locked.as_slice().iter().all(|&b| b == page.index as u8));
            bm.unlock_page(source, page, locked, false).unwrap();
        }
    }
}

// ============================================================================
// Pointers
// ============================================================================

#[test]
fn test_pointer_round_trip() {
    let bm = BufferManager::new(65536, CACHE_PAGES);
    assert_eq!(bm.page_size_bits(), 16);

    let page = BufferPage::new(7);
    for offset in [0, 1, 4095, 65535] {
        let pointer = bm.encode_pointer(page, offset).unwrap();
        assert_eq!(pointer.index, (7 << 16) | offset);
        assert_eq!(bm.decode_pointer(pointer).unwrap(), (page, offset));
    }

    assert!(matches!(
        bm.encode_pointer(page, 65536),
        Err(Error::OffsetOutOfRange { .. })
    ));
}

// ============================================================================
// Sources
// ============================================================================

#[test]
fn test_unloaded_source_is_gone() {
    let bm = create_bm();
    let (sources, _dir) = load_both(&bm);

    for source in sources {
        let page = bm.allocate_page(source).unwrap();
        bm.unload_source(source).unwrap();

        assert!(matches!(
            bm.lock_page(source, page),
            Err(Error::SourceNotFound(_))
        ));
        assert!(matches!(
            bm.unload_source(source),
            Err(Error::SourceNotFound(_))
        ));
    }
    assert_eq!(bm.currently_cached_page_count(), 0);
}

#[test]
fn test_open_missing_file_fails() {
    let bm = create_bm();
    let dir = tempdir().unwrap();

    assert!(matches!(
        bm.load_file_source(dir.path().join("missing.db"), false),
        Err(Error::Io(_))
    ));
    assert_eq!(bm.source_count(), 0);
}
