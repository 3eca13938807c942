//! Source identifier type.

use std::fmt;

/// Identifies one loaded page source (a memory arena or a file).
///
/// Handed out by the buffer manager in increasing order; indices are not
/// reused after the source is unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferSource {
    pub index: u32,
}

impl BufferSource {
    /// Invalid/sentinel source.
    pub const INVALID: BufferSource = BufferSource { index: u32::MAX };

    #[inline]
    pub fn new(index: u32) -> Self {
        BufferSource { index }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for BufferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Source(INVALID)")
        } else {
            write!(f, "Source({})", self.index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_invalid() {
        assert!(!BufferSource::INVALID.is_valid());
        assert!(BufferSource::new(0).is_valid());
        assert_eq!(format!("{}", BufferSource::INVALID), "Source(INVALID)");
        assert_eq!(format!("{}", BufferSource::new(7)), "Source(7)");
    }
}
