//! Block layout within the heap region.
//!
//! ```text
//! Allocated block:
//!   | HEADER: Tag | payload ...                          | FOOTER: Tag |
//! Free block:
//!   | HEADER: Tag | NEXT: usize | PREV: usize | ....... | FOOTER: Tag |
//! ```
//!
//! Every block carries a header and a footer holding the same [`Tag`], so the
//! block below any block can be found through its footer without walking
//! the heap. While a block is free, the first two payload words hold the
//! offsets of its neighbours in the free list. That view is only meaningful
//! while the allocated bit is clear; allocation hands the same bytes to the
//! client.

use core::num::NonZeroUsize;

use crate::tag::Tag;
use crate::utils::{align_up, align_up_overflows, WORD_SIZE};

/// Size of a single boundary tag.
pub const TAG_SIZE: usize = WORD_SIZE;
/// Header plus footer: the fixed overhead of every block.
pub const TAGS_SIZE: usize = 2 * TAG_SIZE;
/// Space for the two free list links.
const LINKS_SIZE: usize = 2 * WORD_SIZE;
/// Smallest block that can hold its tags and its free list links.
pub const MIN_BLOCK_SIZE: usize = TAGS_SIZE + LINKS_SIZE;

const NEXT_FREE_OFFSET: usize = TAG_SIZE;
const PREV_FREE_OFFSET: usize = TAG_SIZE + WORD_SIZE;

/// Total block size required to hold `size` payload bytes.
///
/// Returns `None` if the computation overflows.
#[inline]
pub fn required_block_size(size: usize) -> Option<usize> {
    if align_up_overflows(size) {
        return None;
    }

    let size = align_up(size).checked_add(TAGS_SIZE)?;
    Some(size.max(MIN_BLOCK_SIZE))
}

#[inline]
pub(crate) fn read_word(mem: &[u8], offset: usize) -> usize {
    let mut bytes = [0u8; WORD_SIZE];
    bytes.copy_from_slice(&mem[offset..offset + WORD_SIZE]);
    usize::from_ne_bytes(bytes)
}

#[inline]
pub(crate) fn write_word(mem: &mut [u8], offset: usize, value: usize) {
    mem[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
}

/// A client pointer: the offset of an allocation's payload within the heap region.
///
/// Payload offsets are never zero as the prologue always sits below the first block,
/// which lets `Option<Ptr>` stand in for a nullable pointer at no cost.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ptr(NonZeroUsize);

impl Ptr {
    /// Wrap a raw payload offset. Returns `None` for zero.
    pub const fn new(offset: usize) -> Option<Self> {
        match NonZeroUsize::new(offset) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    /// The payload offset within the heap region.
    pub const fn offset(self) -> usize {
        self.0.get()
    }
}

impl core::fmt::Debug for Ptr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Ptr({:#x})", self.offset())
    }
}

/// Handle to a block: the offset of its header within the heap region.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(pub usize);

impl core::fmt::Debug for Block {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Block({:#x})", self.0)
    }
}

impl Block {
    #[inline]
    pub fn from_payload(ptr: Ptr) -> Self {
        debug_assert!(ptr.offset() >= TAG_SIZE);
        Self(ptr.offset() - TAG_SIZE)
    }

    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }

    #[inline]
    pub fn payload_offset(self) -> usize {
        self.0 + TAG_SIZE
    }

    #[inline]
    pub fn payload_ptr(self) -> Ptr {
        match Ptr::new(self.payload_offset()) {
            Some(ptr) => ptr,
            None => unreachable!("payload offsets are never zero"),
        }
    }

    #[inline]
    pub fn header(self, mem: &[u8]) -> Tag {
        Tag(read_word(mem, self.0))
    }

    /// Reads the footer, trusting the header's size to locate it.
    #[inline]
    pub fn footer(self, mem: &[u8]) -> Tag {
        Tag(read_word(mem, self.0 + self.size(mem) - TAG_SIZE))
    }

    #[inline]
    pub fn size(self, mem: &[u8]) -> usize {
        self.header(mem).size()
    }

    #[inline]
    pub fn is_allocated(self, mem: &[u8]) -> bool {
        self.header(mem).is_allocated()
    }

    /// Write matching header and footer tags.
    #[inline]
    pub fn set(self, mem: &mut [u8], size: usize, allocated: bool) {
        debug_assert!(size >= TAGS_SIZE);

        let tag = Tag::new(size, allocated);
        write_word(mem, self.0, tag.0);
        write_word(mem, self.0 + size - TAG_SIZE, tag.0);
    }

    /// Zero the header of a block that was merged into the one below it,
    /// so stale pointers to it no longer look valid.
    #[inline]
    pub fn clear_header(self, mem: &mut [u8]) {
        write_word(mem, self.0, 0);
    }

    /// The block directly above this one.
    #[inline]
    pub fn next(self, mem: &[u8]) -> Block {
        Block(self.0 + self.size(mem))
    }

    /// The tag in the footer of the block directly below this one.
    #[inline]
    pub fn prev_tag(self, mem: &[u8]) -> Tag {
        Tag(read_word(mem, self.0 - TAG_SIZE))
    }

    /// The block directly below this one.
    #[inline]
    pub fn prev(self, mem: &[u8]) -> Block {
        Block(self.0 - self.prev_tag(mem).size())
    }

    /// Usable bytes between the tags.
    #[inline]
    pub fn payload<'m>(self, mem: &'m [u8]) -> &'m [u8] {
        let end = self.0 + self.size(mem) - TAG_SIZE;
        &mem[self.payload_offset()..end]
    }

    #[inline]
    pub fn payload_mut<'m>(self, mem: &'m mut [u8]) -> &'m mut [u8] {
        let end = self.0 + self.size(mem) - TAG_SIZE;
        &mut mem[self.payload_offset()..end]
    }

    #[inline]
    pub fn next_free(self, mem: &[u8]) -> Block {
        debug_assert!(!self.is_allocated(mem), "{:?} is not free", self);
        Block(read_word(mem, self.0 + NEXT_FREE_OFFSET))
    }

    #[inline]
    pub fn prev_free(self, mem: &[u8]) -> Block {
        debug_assert!(!self.is_allocated(mem), "{:?} is not free", self);
        Block(read_word(mem, self.0 + PREV_FREE_OFFSET))
    }

    #[inline]
    pub fn set_next_free(self, mem: &mut [u8], next: Block) {
        debug_assert!(!self.is_allocated(mem), "{:?} is not free", self);
        write_word(mem, self.0 + NEXT_FREE_OFFSET, next.0);
    }

    #[inline]
    pub fn set_prev_free(self, mem: &mut [u8], prev: Block) {
        debug_assert!(!self.is_allocated(mem), "{:?} is not free", self);
        write_word(mem, self.0 + PREV_FREE_OFFSET, prev.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_sizes() {
        assert_eq!(required_block_size(1), Some(MIN_BLOCK_SIZE));
        assert_eq!(required_block_size(LINKS_SIZE), Some(MIN_BLOCK_SIZE));
        assert_eq!(required_block_size(LINKS_SIZE + 1), Some(MIN_BLOCK_SIZE + WORD_SIZE));
        assert_eq!(required_block_size(100), Some(align_up(100) + TAGS_SIZE));
        assert_eq!(required_block_size(usize::MAX), None);
        assert_eq!(required_block_size(usize::MAX - WORD_SIZE * 2), None);
    }

    #[test]
    fn tags_and_neighbours() {
        let mut mem = [0u8; 16 * WORD_SIZE];
        let len = mem.len();

        let low = Block(0);
        let high = Block(MIN_BLOCK_SIZE);
        low.set(&mut mem, MIN_BLOCK_SIZE, true);
        high.set(&mut mem, len - MIN_BLOCK_SIZE, false);

        assert_eq!(low.header(&mem), low.footer(&mem));
        assert!(low.is_allocated(&mem));
        assert_eq!(low.next(&mem), high);
        assert_eq!(high.prev(&mem), low);
        assert_eq!(high.prev_tag(&mem), Tag::new(MIN_BLOCK_SIZE, true));
        assert!(!high.is_allocated(&mem));
        assert_eq!(high.footer(&mem).size(), len - MIN_BLOCK_SIZE);

        high.set_next_free(&mut mem, high);
        high.set_prev_free(&mut mem, low);
        assert_eq!(high.next_free(&mem), high);
        assert_eq!(high.prev_free(&mem), low);

        assert_eq!(low.payload(&mem).len(), MIN_BLOCK_SIZE - TAGS_SIZE);
        low.payload_mut(&mut mem).fill(0xab);
        assert_eq!(low.header(&mem), Tag::new(MIN_BLOCK_SIZE, true));
        assert_eq!(low.footer(&mem), Tag::new(MIN_BLOCK_SIZE, true));
    }

    #[test]
    fn payload_pointer_round_trip() {
        let block = Block(3 * WORD_SIZE);
        let ptr = block.payload_ptr();
        assert_eq!(ptr.offset(), 4 * WORD_SIZE);
        assert_eq!(Block::from_payload(ptr), block);
        assert!(Ptr::new(0).is_none());
    }
}
