//! Page identifier type.

use std::fmt;

/// Identifies one fixed-size page within a source.
///
/// Page `n` lives at byte offset `n * page_size` of its source. Page 0 of
/// every source is the head of the free-list and is never handed out.
///
/// # Example
/// ```
/// use pagebuf::BufferPage;
///
/// let page = BufferPage::new(42);
/// assert!(page.is_valid());
/// assert_eq!(page.index, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferPage {
    pub index: u64,
}

impl BufferPage {
    /// Invalid/sentinel page.
    ///
    /// Also terminates the free-list chain on disk.
    pub const INVALID: BufferPage = BufferPage { index: u64::MAX };

    /// The free-list head page of every source.
    pub const HEAD: BufferPage = BufferPage { index: 0 };

    /// Create a new BufferPage.
    #[inline]
    pub fn new(index: u64) -> Self {
        BufferPage { index }
    }

    /// Check if this page is valid (not the sentinel value).
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for BufferPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Page(INVALID)")
        } else {
            write!(f, "Page({})", self.index)
        }
    }
}
