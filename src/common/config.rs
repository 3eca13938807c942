//! Configuration constants for pagebuf.

/// Default size of a page in bytes (64KB).
///
/// Large pages keep the per-page mapping overhead low for file sources,
/// where every page is its own `mmap` region.
pub const DEFAULT_PAGE_SIZE: u64 = 64 * 1024;

/// Default number of pages that may stay mapped across all sources.
pub const DEFAULT_CACHE_PAGE_COUNT: u64 = 1024;

/// An eviction sweep shrinks the cache to this fraction of the budget.
pub const EVICTION_TARGET_NUMERATOR: u64 = 3;
pub const EVICTION_TARGET_DENOMINATOR: u64 = 4;

/// Fallback when the host refuses to report its page size.
const FALLBACK_OS_PAGE_SIZE: u64 = 4096;

/// Minimum mappable granularity of the host.
///
/// Every page of a file source is mapped at `index * page_size`, so the
/// page size has to be a multiple of this value.
pub fn os_page_size() -> u64 {
    // SAFETY: sysconf only reads a process-wide constant.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        FALLBACK_OS_PAGE_SIZE
    }
}

/// Round a requested page size up to a multiple of the host page size.
///
/// A request of zero yields one host page.
pub fn round_page_size(requested: u64) -> u64 {
    let granularity = os_page_size();
    let requested = requested.max(1);
    requested.div_ceil(granularity) * granularity
}

/// Construction parameters of a [`BufferManager`](crate::BufferManager).
///
/// # Example
/// ```
/// use pagebuf::common::config::BufferConfig;
///
/// let config = BufferConfig::default().with_cache_page_count(16);
/// assert_eq!(config.cache_page_count, 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Requested page size; rounded up by the manager.
    pub page_size: u64,
    /// Maximum number of mapped pages across all sources.
    pub cache_page_count: u64,
}

impl BufferConfig {
    pub fn new(page_size: u64, cache_page_count: u64) -> Self {
        Self {
            page_size,
            cache_page_count,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_page_count(mut self, cache_page_count: u64) -> Self {
        self.cache_page_count = cache_page_count;
        self
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_CACHE_PAGE_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_page_size_is_power_of_two() {
        assert!(os_page_size().is_power_of_two());
    }

    #[test]
    fn test_round_page_size() {
        let granularity = os_page_size();
        assert_eq!(round_page_size(0), granularity);
        assert_eq!(round_page_size(1), granularity);
        assert_eq!(round_page_size(granularity), granularity);
        assert_eq!(round_page_size(granularity + 1), granularity * 2);
        assert_eq!(round_page_size(DEFAULT_PAGE_SIZE) % granularity, 0);
    }

    #[test]
    fn test_eviction_target_below_budget() {
        assert!(EVICTION_TARGET_NUMERATOR < EVICTION_TARGET_DENOMINATOR);
    }

    #[test]
    fn test_config_builders() {
        let config = BufferConfig::default()
            .with_page_size(4096)
            .with_cache_page_count(8);
        assert_eq!(config, BufferConfig::new(4096, 8));
        assert_eq!(BufferConfig::default().page_size, DEFAULT_PAGE_SIZE);
    }
}
