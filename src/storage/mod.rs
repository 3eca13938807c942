//! Storage layer - page sources and their on-page free-list.
//!
//! This module handles the backing stores behind the buffer manager:
//! - [`PageSource`] - The capability every backend implements
//! - [`MemorySource`] - Pages held in heap blocks
//! - [`FileSource`] - Pages mapped from a file
//! - [`LockedPage`] - Exclusive access to one page's bytes

mod file_source;
mod free_list;
mod memory_source;
mod page_memory;
mod source;

pub use file_source::FileSource;
pub use memory_source::MemorySource;
pub use page_memory::LockedPage;
pub use source::{PageSource, UnmapCandidate};
