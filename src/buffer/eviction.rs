//! Sweep planning for the cache budget.
//!
//! A sweep starts once more pages are mapped than the budget allows and
//! tries to bring the count down to three quarters of the budget, so that
//! the next few mappings do not immediately trigger another sweep.
//!
//! ```text
//!  0          target (3/4)       budget        cached
//!  ├──────────────┼────────────────┼─────────────┤
//!                 │◀──────────── deficit ───────▶│
//!                                  │◀ overshoot ▶│
//! ```
//!
//! Unmapping fewer than `deficit` pages is fine. Unmapping fewer than
//! `overshoot` pages leaves the cache over budget, which is fatal.

use crate::common::config::{EVICTION_TARGET_DENOMINATOR, EVICTION_TARGET_NUMERATOR};
use crate::storage::UnmapCandidate;

/// How many pages a sweep wants and needs to unmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepPlan {
    /// Pages to unmap to reach the eviction target.
    pub(crate) deficit: u64,
    /// Pages that must be unmapped to get back within budget.
    pub(crate) overshoot: u64,
}

/// Number of cached pages a sweep aims for.
pub(crate) fn eviction_target(cache_page_count: u64) -> u64 {
    cache_page_count * EVICTION_TARGET_NUMERATOR / EVICTION_TARGET_DENOMINATOR
}

/// `None` while the cache is within budget.
pub(crate) fn plan(cached: u64, cache_page_count: u64) -> Option<SweepPlan> {
    if cached <= cache_page_count {
        return None;
    }
    Some(SweepPlan {
        deficit: cached - eviction_target(cache_page_count),
        overshoot: cached - cache_page_count,
    })
}

/// The `deficit` least recently used candidates across every source.
pub(crate) fn select_victims(
    mut candidates: Vec<UnmapCandidate>,
    deficit: u64,
) -> Vec<UnmapCandidate> {
    candidates.sort_by_key(|candidate| candidate.last_access);
    candidates.truncate(usize::try_from(deficit).unwrap_or(usize::MAX));
    candidates
}
