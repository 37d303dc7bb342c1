use crate::block::Block;

/// Circular doubly-linked list over the free blocks of a heap.
///
/// The list is:
///  * **Intrusive**: links live in the free blocks' payloads, see [`Block::next_free`]
///  * **Circular**: the head's `prev` is the tail, a lone block links to itself
///  * **Doubly linked** to allow single reference removal in O(1)
///  * **Headed**: `head` is the search start and the insertion point
///
/// Only link words are touched, never boundary tags. Blocks passed in must be free.
///
/// This data structure is not thread-safe, use mutexes/locks to mutually exclude data access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct FreeList {
    head: Option<Block>,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    #[inline]
    pub fn head(&self) -> Option<Block> {
        self.head
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Link `block` in as the new head.
    pub fn insert(&mut self, mem: &mut [u8], block: Block) {
        match self.head {
            None => {
                block.set_next_free(mem, block);
                block.set_prev_free(mem, block);
            }
            Some(head) => {
                // head and tail can be the same block, so read before writing
                let tail = head.prev_free(mem);

                block.set_next_free(mem, head);
                block.set_prev_free(mem, tail);
                tail.set_next_free(mem, block);
                head.set_prev_free(mem, block);
            }
        }

        self.head = Some(block);
    }

    /// Unlink `block`. If it was the head, the head advances to its successor.
    pub fn remove(&mut self, mem: &mut [u8], block: Block) {
        debug_assert!(self.head.is_some());

        let next = block.next_free(mem);
        let prev = block.prev_free(mem);

        if next == block {
            debug_assert_eq!(self.head, Some(block));
            self.head = None;
            return;
        }

        prev.set_next_free(mem, next);
        next.set_prev_free(mem, prev);

        if self.head == Some(block) {
            self.head = Some(next);
        }
    }

    /// Iterates once around the list starting at the head.
    ///
    /// The list must not be modified while the iterator is alive,
    /// which the shared borrow of `mem` enforces.
    pub fn iter<'m>(&self, mem: &'m [u8]) -> Iter<'m> {
        Iter { mem, head: self.head, cursor: self.head }
    }
}

#[derive(Debug, Clone)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub(crate) struct Iter<'m> {
    mem: &'m [u8],
    head: Option<Block>,
    cursor: Option<Block>,
}

impl<'m> Iterator for Iter<'m> {
    type Item = Block;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        let next = current.next_free(self.mem);
        self.cursor = if Some(next) == self.head { None } else { Some(next) };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;
    use crate::block::MIN_BLOCK_SIZE;

    fn free_blocks(mem: &mut [u8], count: usize) -> Vec<Block> {
        (0..count)
            .map(|i| {
                let block = Block(i * MIN_BLOCK_SIZE);
                block.set(mem, MIN_BLOCK_SIZE, false);
                block
            })
            .collect()
    }

    fn collect(list: &FreeList, mem: &[u8]) -> Vec<Block> {
        list.iter(mem).collect()
    }

    #[test]
    fn insert_and_remove() {
        let mut mem = [0u8; 4 * MIN_BLOCK_SIZE];
        let blocks = free_blocks(&mut mem, 4);
        let (a, b, c, d) = (blocks[0], blocks[1], blocks[2], blocks[3]);

        let mut list = FreeList::new();
        assert!(list.is_empty());
        assert!(collect(&list, &mem).is_empty());

        list.insert(&mut mem, a);
        assert_eq!(a.next_free(&mem), a);
        assert_eq!(a.prev_free(&mem), a);
        assert_eq!(collect(&list, &mem), [a]);

        list.insert(&mut mem, b);
        list.insert(&mut mem, c);
        assert_eq!(list.head(), Some(c));
        assert_eq!(collect(&list, &mem), [c, b, a]);
        // circular: the tail links back to the head
        assert_eq!(a.next_free(&mem), c);
        assert_eq!(c.prev_free(&mem), a);

        // middle
        list.remove(&mut mem, b);
        assert_eq!(collect(&list, &mem), [c, a]);

        // head advances to its successor
        list.insert(&mut mem, d);
        list.remove(&mut mem, d);
        assert_eq!(list.head(), Some(c));
        list.remove(&mut mem, c);
        assert_eq!(list.head(), Some(a));
        assert_eq!(collect(&list, &mem), [a]);

        list.remove(&mut mem, a);
        assert!(list.is_empty());
        assert!(collect(&list, &mem).is_empty());
    }

    #[test]
    fn remove_tail() {
        let mut mem = [0u8; 3 * MIN_BLOCK_SIZE];
        let blocks = free_blocks(&mut mem, 3);

        let mut list = FreeList::new();
        for &block in &blocks {
            list.insert(&mut mem, block);
        }

        list.remove(&mut mem, blocks[0]);
        assert_eq!(collect(&list, &mem), [blocks[2], blocks[1]]);
        assert_eq!(blocks[1].next_free(&mem), blocks[2]);
        assert_eq!(blocks[2].prev_free(&mem), blocks[1]);
    }
}
