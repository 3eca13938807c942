//! Buffer pointers: a page index and an in-page offset packed in one word.

use std::fmt;

use crate::common::{BufferPage, Error, Result};

/// A `(page, offset)` pair packed as `(page.index << page_size_bits) | offset`.
///
/// Pointers are only meaningful together with the [`PointerCodec`] of the
/// manager that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferPointer {
    pub index: u64,
}

impl BufferPointer {
    pub const INVALID: BufferPointer = BufferPointer { index: u64::MAX };

    #[inline]
    pub fn new(index: u64) -> Self {
        BufferPointer { index }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for BufferPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Pointer(INVALID)")
        } else {
            write!(f, "Pointer({:#x})", self.index)
        }
    }
}

/// Packs and unpacks [`BufferPointer`]s for one page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerCodec {
    page_size: u64,
    page_size_bits: u32,
}

impl PointerCodec {
    /// Create a codec for `page_size` byte pages.
    ///
    /// `page_size_bits` is the width needed for every offset in
    /// `[0, page_size)`, so a 64KB page uses 16 bits.
    pub fn new(page_size: u64) -> Self {
        let page_size_bits = if page_size <= 1 {
            0
        } else {
            u64::BITS - (page_size - 1).leading_zeros()
        };
        Self {
            page_size,
            page_size_bits,
        }
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    #[inline]
    pub fn page_size_bits(&self) -> u32 {
        self.page_size_bits
    }

    /// Pack `page` and `offset` into a pointer.
    ///
    /// # Errors
    /// - `Error::OffsetOutOfRange` if `offset >= page_size`
    /// - `Error::PageIndexOverflow` if the page index loses bits when shifted
    pub fn encode(&self, page: BufferPage, offset: u64) -> Result<BufferPointer> {
        if offset >= self.page_size {
            return Err(Error::OffsetOutOfRange {
                offset,
                page_size: self.page_size,
            });
        }
        if !page.is_valid() || page.index.leading_zeros() < self.page_size_bits {
            return Err(Error::PageIndexOverflow(page));
        }

        let pointer = BufferPointer::new((page.index << self.page_size_bits) | offset);
        if !pointer.is_valid() {
            return Err(Error::PageIndexOverflow(page));
        }
        Ok(pointer)
    }

    /// Split a pointer back into its page and offset.
    ///
    /// # Errors
    /// - `Error::OffsetOutOfRange` if the low bits hold an offset that no
    ///   page of this size contains
    pub fn decode(&self, pointer: BufferPointer) -> Result<(BufferPage, u64)> {
        let mask = if self.page_size_bits == 0 {
            0
        } else {
            u64::MAX >> (u64::BITS - self.page_size_bits)
        };
        let offset = pointer.index & mask;
        if offset >= self.page_size {
            return Err(Error::OffsetOutOfRange {
                offset,
                page_size: self.page_size,
            });
        }

        let page = if self.page_size_bits == 0 {
            pointer.index
        } else {
            pointer.index >> self.page_size_bits
        };
        Ok((BufferPage::new(page), offset))
    }
}
