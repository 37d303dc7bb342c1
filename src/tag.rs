//! A `Tag` is a block size with the allocated flag packed into the
//! least significant bit. Block sizes are word multiples, so the low
//! bits are always free to hold flags.

use crate::utils::ALIGN;

/// Boundary tag word, written at both ends of every block.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(pub usize);

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("is_allocated", &self.is_allocated())
            .finish()
    }
}

impl Tag {
    pub const ALLOCATED_FLAG: usize = 1 << 0;

    const FLAGS: usize = ALIGN - 1;

    #[inline]
    pub fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size & Self::FLAGS == 0, "unaligned block size {:#x}", size);

        if allocated {
            Self(size | Self::ALLOCATED_FLAG)
        } else {
            Self(size)
        }
    }

    #[inline]
    pub fn size(self) -> usize {
        self.0 & !Self::FLAGS
    }

    #[inline]
    pub fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_FLAG != 0
    }

    /// Returns whether any bit other than a known flag is set below the alignment.
    #[inline]
    pub fn has_stray_bits(self) -> bool {
        self.0 & Self::FLAGS & !Self::ALLOCATED_FLAG != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_packing() {
        let tag = Tag::new(48, true);
        assert_eq!(tag.size(), 48);
        assert!(tag.is_allocated());
        assert!(!tag.has_stray_bits());

        let tag = Tag::new(tag.size(), false);
        assert_eq!(tag.size(), 48);
        assert!(!tag.is_allocated());
        assert_eq!(tag, Tag(48));

        assert!(Tag(48 | 0b10).has_stray_bits());
        assert_eq!(Tag(ALIGN * 5 | Tag::ALLOCATED_FLAG).size(), ALIGN * 5);
    }
}
