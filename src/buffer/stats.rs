//! Buffer manager statistics and the shared cached-page counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the manager and every source it owns.
///
/// Each source receives an `Arc<BufferStats>` at construction and reports
/// its own mappings here, so `cached_pages` is the live total across all
/// sources that the eviction sweep compares against the cache budget.
///
/// # Memory Ordering
/// All counters use `Ordering::Relaxed`: each update only needs to be
/// atomic, and the sweep tolerates a slightly stale total.
///
/// # Example
/// ```
/// use pagebuf::BufferStats;
///
/// let stats = BufferStats::new();
/// stats.page_mapped();
/// assert_eq!(stats.cached_pages(), 1);
/// stats.page_unmapped();
/// assert_eq!(stats.cached_pages(), 0);
/// ```
#[derive(Debug)]
pub struct BufferStats {
    /// Pages currently mapped across all sources.
    cached_pages: AtomicU64,

    /// Logical clock used as the access stamp of page descriptors.
    clock: AtomicU64,

    /// Number of mappings ever created.
    pub pages_mapped: AtomicU64,

    /// Number of mappings ever released.
    pub pages_unmapped: AtomicU64,

    /// Pages unmapped by an eviction sweep.
    pub evictions: AtomicU64,

    /// Number of eviction sweeps run.
    pub sweeps: AtomicU64,

    /// Pages synchronously flushed to their file.
    pub pages_flushed: AtomicU64,
}

impl BufferStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            cached_pages: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            pages_mapped: AtomicU64::new(0),
            pages_unmapped: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            pages_flushed: AtomicU64::new(0),
        }
    }

    /// Pages currently mapped across all sources.
    #[inline]
    pub fn cached_pages(&self) -> u64 {
        self.cached_pages.load(Ordering::Relaxed)
    }

    /// Record a new mapping.
    pub fn page_mapped(&self) {
        self.cached_pages.fetch_add(1, Ordering::Relaxed);
        self.pages_mapped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a released mapping.
    pub fn page_unmapped(&self) {
        let old = self.cached_pages.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(old > 0, "cached page count underflow");
        self.pages_unmapped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synchronous page flush.
    pub fn page_flushed(&self) {
        self.pages_flushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Next access stamp. Strictly increasing across all sources.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cached_pages: self.cached_pages(),
            pages_mapped: self.pages_mapped.load(Ordering::Relaxed),
            pages_unmapped: self.pages_unmapped.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            pages_flushed: self.pages_flushed.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of [`BufferStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cached_pages: u64,
    pub pages_mapped: u64,
    pub pages_unmapped: u64,
    pub evictions: u64,
    pub sweeps: u64,
    pub pages_flushed: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ cached: {}, mapped: {}, unmapped: {}, evictions: {}, sweeps: {}, flushed: {} }}",
            self.cached_pages,
            self.pages_mapped,
            self.pages_unmapped,
            self.evictions,
            self.sweeps,
            self.pages_flushed
        )
    }
}
