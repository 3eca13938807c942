//! Buffer management.
//!
//! The buffer manager is the layer between storage engines and the page
//! sources. It owns every loaded source and keeps the number of mapped
//! pages across all of them within one cache budget.
//!
//! # Components
//! - [`BufferManager`] - The façade over all sources
//! - [`PageGuard`] - RAII guard that unlocks a page on drop
//! - [`BufferStats`] - Shared counters, including the cached-page total

mod buffer_manager;
mod eviction;
mod page_guard;
mod stats;

pub use buffer_manager::BufferManager;
pub use page_guard::PageGuard;
pub use stats::{BufferStats, StatsSnapshot};
