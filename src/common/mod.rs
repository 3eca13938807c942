//! Common types shared across pagebuf.
//!
//! This module contains the fundamental primitives:
//! - Configuration constants
//! - Error types
//! - Identifiers (BufferSource, BufferPage, BufferPointer)

pub mod config;
pub mod error;
mod page_id;
pub mod pointer;
mod source_id;

pub use error::{Error, Result};
pub use page_id::BufferPage;
pub use pointer::{BufferPointer, PointerCodec};
pub use source_id::BufferSource;
