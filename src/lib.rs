//! pagebuf - a paged buffer manager for database storage engines.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            pagebuf                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │             Buffer Layer (buffer/)                       │   │
//! │  │   BufferManager + PageGuard + BufferStats                │   │
//! │  │   registry of sources, cache budget, eviction sweep      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │             Storage Layer (storage/)                     │   │
//! │  │   PageSource: MemorySource (heap) | FileSource (mmap)    │   │
//! │  │   on-page free-list rooted in page 0                     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │             Common (common/)                             │   │
//! │  │   BufferSource, BufferPage, BufferPointer, Error, config │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (identifiers, pointer codec, Error, config)
//! - [`buffer`] - The buffer manager, page guards and statistics
//! - [`storage`] - Memory and file page sources
//!
//! # Quick Start
//! ```no_run
//! use pagebuf::BufferManager;
//!
//! let bm = BufferManager::new(64 * 1024, 1024);
//! let source = bm.load_file_source("my_database.db", true).unwrap();
//!
//! // Allocate a page and write to it
//! let page = bm.allocate_page(source).unwrap();
//! let mut guard = bm.write_page(source, page).unwrap();
//! guard[..5].copy_from_slice(b"hello");
//! guard.commit().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::BufferConfig;
pub use common::error::UnlockError;
pub use common::{BufferPage, BufferPointer, BufferSource, Error, Result};

pub use buffer::{BufferManager, BufferStats, PageGuard, StatsSnapshot};
pub use storage::LockedPage;
