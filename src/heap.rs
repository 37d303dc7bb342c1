//! The heap engine.
//!
//! ```text
//! | PROLOGUE | block | block | ... | block | EPILOGUE |
//! ^ base                                              ^ region high end
//! ```
//!
//! The prologue and epilogue are permanently allocated, payload-free blocks
//! bounding the heap. Growth always happens at the epilogue, which moves up
//! to the new high end.

use core::cmp::Ordering;

use log::{debug, trace, warn};

#[cfg(feature = "counters")]
use crate::counters::Counters;

use crate::block::{required_block_size, Block, Ptr, MIN_BLOCK_SIZE, TAGS_SIZE, TAG_SIZE};
use crate::error::AllocError;
use crate::llist::FreeList;
use crate::region::Region;
use crate::tag::Tag;
use crate::utils::{align_up, align_up_overflows, is_aligned};

/// A snapshot of a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    /// Offset of the block's header within the region.
    pub offset: usize,
    /// Total size, tags included.
    pub size: usize,
    /// Whether the block is allocated. Sentinels always are.
    pub allocated: bool,
}

impl BlockInfo {
    fn of(block: Block, mem: &[u8]) -> Self {
        let tag = block.header(mem);
        Self { offset: block.offset(), size: tag.size(), allocated: tag.is_allocated() }
    }

    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> usize {
        self.offset + TAG_SIZE
    }
}

/// A boundary-tag, first-fit allocator over a [`Region`].
///
/// Create one with [`Heap::init`], then [`allocate`](Heap::allocate),
/// [`free`](Heap::free) and [`resize`](Heap::resize).
///
/// Allocations are identified by [`Ptr`], a payload offset into the region.
/// Their bytes are reached through [`payload`](Heap::payload) and
/// [`payload_mut`](Heap::payload_mut).
///
/// The heap is not internally synchronized. Wrap it in a
/// [`Locked`](crate::Locked) to share it between threads.
pub struct Heap<S: Region> {
    region: S,

    prologue: Block,
    epilogue: Block,

    free_list: FreeList,

    #[cfg(feature = "counters")]
    pub(crate) counters: Counters,
}

impl<S: Region> core::fmt::Debug for Heap<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("prologue", &self.prologue)
            .field("epilogue", &self.epilogue)
            .field("free_list_head", &self.free_list.head())
            .field("heap_size", &format_args!("{:#x}", self.heap_size()))
            .finish()
    }
}

impl<S: Region> Heap<S> {
    /// Set up the prologue and epilogue at the region's current high end.
    ///
    /// The high end is first padded up to a word boundary if needed.
    /// Fails with [`AllocError::OutOfMemory`] if the region refuses to grow.
    pub fn init(mut region: S) -> Result<Self, AllocError> {
        let high = region.high();
        if align_up_overflows(high) {
            return Err(AllocError::OutOfMemory);
        }

        let padding = align_up(high) - high;
        if padding != 0 {
            region.sbrk(padding as isize).map_err(|()| AllocError::OutOfMemory)?;
        }

        let base = region.sbrk((2 * TAGS_SIZE) as isize).map_err(|()| {
            warn!("region refused the {} bytes of heap sentinels", 2 * TAGS_SIZE);
            AllocError::OutOfMemory
        })?;
        debug_assert!(is_aligned(base));

        let prologue = Block(base);
        let epilogue = Block(base + TAGS_SIZE);

        let mem = region.memory_mut();
        prologue.set(mem, TAGS_SIZE, true);
        epilogue.set(mem, TAGS_SIZE, true);

        debug!("heap initialized: prologue {:?}, epilogue {:?}", prologue, epilogue);

        #[allow(unused_mut)]
        let mut heap = Self {
            region,
            prologue,
            epilogue,
            free_list: FreeList::new(),
            #[cfg(feature = "counters")]
            counters: Counters::new(),
        };

        #[cfg(feature = "counters")]
        heap.counters.account_growth(2 * TAGS_SIZE);

        heap.scan_for_errors();

        Ok(heap)
    }

    /// Allocate a block with room for at least `size` payload bytes.
    ///
    /// Zero-sized requests are rejected with [`AllocError::InvalidSize`].
    /// The region is only extended if no free block is large enough.
    pub fn allocate(&mut self, size: usize) -> Result<Ptr, AllocError> {
        if size < 1 {
            return Err(AllocError::InvalidSize);
        }

        let need = required_block_size(size).ok_or(AllocError::OutOfMemory)?;
        let block = self.allocate_block(need)?;

        self.scan_for_errors();

        Ok(block.payload_ptr())
    }

    /// Free a previously allocated block, merging it with free neighbours.
    ///
    /// `None` is a no-op. Pointers that don't address a live allocation
    /// of this heap are rejected without modifying anything.
    pub fn free(&mut self, ptr: Option<Ptr>) -> Result<(), AllocError> {
        let Some(ptr) = ptr else {
            return Ok(());
        };

        let block = self.checked_block(ptr)?;
        self.release(block);

        self.scan_for_errors();

        Ok(())
    }

    /// Resize an allocation to hold `size` payload bytes.
    ///
    /// - `size == 0` frees `ptr` and returns `None`.
    /// - `ptr == None` is equivalent to [`allocate`](Heap::allocate).
    /// - Shrinking always happens in place.
    /// - Growing happens in place when the block above is free and big enough.
    ///   Failing that, a free block below that makes up the difference is
    ///   merged and the payload slid down into it. Failing that, a block last
    ///   in the heap is extended. Otherwise the payload is moved to a new
    ///   allocation.
    ///
    /// On failure the original allocation is left untouched.
    pub fn resize(&mut self, ptr: Option<Ptr>, size: usize) -> Result<Option<Ptr>, AllocError> {
        if size == 0 {
            self.free(ptr)?;
            return Ok(None);
        }

        let Some(ptr) = ptr else {
            return self.allocate(size).map(Some);
        };

        let block = self.checked_block(ptr)?;
        let need = required_block_size(size).ok_or(AllocError::OutOfMemory)?;
        let current = block.size(self.region.memory());

        let block = match current.cmp(&need) {
            Ordering::Equal => return Ok(Some(ptr)),
            Ordering::Greater => {
                self.shrink_in_place(block, current, need);
                block
            }
            Ordering::Less => self.grow(block, current, need)?,
        };

        self.scan_for_errors();

        Ok(Some(block.payload_ptr()))
    }

    /// The payload bytes of a live allocation.
    ///
    /// The slice spans the whole block, so it may be longer than requested.
    pub fn payload(&self, ptr: Ptr) -> Result<&[u8], AllocError> {
        let block = self.checked_block(ptr)?;
        Ok(block.payload(self.region.memory()))
    }

    /// The payload bytes of a live allocation. See [`payload`](Heap::payload).
    pub fn payload_mut(&mut self, ptr: Ptr) -> Result<&mut [u8], AllocError> {
        let block = self.checked_block(ptr)?;
        Ok(block.payload_mut(self.region.memory_mut()))
    }

    /// Number of payload bytes usable through `ptr`.
    pub fn usable_size(&self, ptr: Ptr) -> Result<usize, AllocError> {
        let block = self.checked_block(ptr)?;
        Ok(block.size(self.region.memory()) - TAGS_SIZE)
    }

    /// Bytes managed by the heap, from the prologue to the end of the epilogue.
    pub fn heap_size(&self) -> usize {
        self.region.high() - self.prologue.offset()
    }

    /// Every block from the prologue to the epilogue inclusive, in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks { mem: self.region.memory(), cursor: Some(self.prologue), epilogue: self.epilogue }
    }

    /// The free blocks, in the order allocation searches them.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let mem = self.region.memory();
        self.free_list.iter(mem).map(move |block| BlockInfo::of(block, mem))
    }

    /// The underlying region.
    pub fn region(&self) -> &S {
        &self.region
    }

    /// Tear down the heap, returning the region.
    pub fn into_region(self) -> S {
        self.region
    }

    /// Wrap in [`Locked`](crate::Locked), a mutex-locked wrapper using [`lock_api`].
    ///
    /// # Examples
    /// ```
    /// # use tagfit::*;
    /// let heap = Heap::init(VecRegion::new()).unwrap();
    /// let locked = heap.lock::<spin::Mutex<()>>();
    /// let ptr = locked.allocate(32).unwrap();
    /// locked.free(Some(ptr)).unwrap();
    /// ```
    #[cfg(feature = "lock_api")]
    pub const fn lock<R: lock_api::RawMutex>(self) -> crate::Locked<R, S> {
        crate::Locked::new(self)
    }

    /// Walk the whole heap and the free list, checking every invariant.
    ///
    /// - Sentinels are intact and the epilogue ends at the region's high end.
    /// - Every block's header and footer agree, and sizes tile the heap exactly.
    /// - No two free blocks are adjacent.
    /// - The free list links are consistent and hold exactly the free blocks.
    pub fn validate(&self) -> Result<(), AllocError> {
        let mem = self.region.memory();
        let corrupted = |block: Block, reason| AllocError::Corrupted { offset: block.offset(), reason };
        let sentinel = Tag::new(TAGS_SIZE, true);

        for block in [self.prologue, self.epilogue] {
            if block.header(mem) != sentinel || block.footer(mem) != sentinel {
                return Err(corrupted(block, "sentinel tag damaged"));
            }
        }
        if self.epilogue.offset() + TAGS_SIZE != mem.len() {
            return Err(corrupted(self.epilogue, "epilogue is not at the region's high end"));
        }

        let mut block = Block(self.prologue.offset() + TAGS_SIZE);
        let mut below_is_free = false;
        let mut free_count = 0;

        while block != self.epilogue {
            let header = block.header(mem);
            let size = header.size();

            if header.has_stray_bits() {
                return Err(corrupted(block, "stray bits in tag"));
            }
            if size < MIN_BLOCK_SIZE {
                return Err(corrupted(block, "block smaller than the minimum block size"));
            }
            if block.offset() + size > self.epilogue.offset() {
                return Err(corrupted(block, "block overruns the epilogue"));
            }
            if block.footer(mem) != header {
                return Err(corrupted(block, "header and footer disagree"));
            }

            if !header.is_allocated() {
                if below_is_free {
                    return Err(corrupted(block, "adjacent free blocks"));
                }
                free_count += 1;
            }

            below_is_free = !header.is_allocated();
            block = Block(block.offset() + size);
        }

        let in_heap = |block: Block| {
            block.offset() >= self.prologue.offset() + TAGS_SIZE
                && block.offset() + MIN_BLOCK_SIZE <= self.epilogue.offset()
                && is_aligned(block.offset())
        };

        let mut listed = 0;
        if let Some(head) = self.free_list.head() {
            let mut node = head;
            loop {
                if listed == free_count {
                    return Err(corrupted(node, "free list longer than the number of free blocks"));
                }
                if !in_heap(node) {
                    return Err(corrupted(node, "free list link leaves the heap"));
                }
                if node.is_allocated(mem) {
                    return Err(corrupted(node, "allocated block in the free list"));
                }

                let next = node.next_free(mem);
                if !in_heap(next) || next.is_allocated(mem) {
                    return Err(corrupted(node, "free list link to a non-free block"));
                }
                if next.prev_free(mem) != node {
                    return Err(corrupted(next, "free list links disagree"));
                }

                listed += 1;
                node = next;
                if node == head {
                    break;
                }
            }
        }

        if listed != free_count {
            return Err(corrupted(self.prologue, "free block missing from the free list"));
        }

        Ok(())
    }

    /// Recover and validate the block behind a client pointer.
    ///
    /// Besides the block's own tags, the blocks directly below and above
    /// must carry matching tags. This is best-effort: payload bytes that
    /// happen to mimic a consistent run of tags still pass.
    fn checked_block(&self, ptr: Ptr) -> Result<Block, AllocError> {
        let offset = ptr.offset();
        let invalid = AllocError::InvalidPointer { offset };

        let lowest_payload = self.prologue.offset() + TAGS_SIZE + TAG_SIZE;
        if offset < lowest_payload || offset >= self.epilogue.offset() || !is_aligned(offset) {
            warn!("rejecting pointer {:#x}: outside the heap or misaligned", offset);
            return Err(invalid);
        }

        let block = Block::from_payload(ptr);
        let mem = self.region.memory();
        let header = block.header(mem);
        let size = header.size();

        if header.has_stray_bits()
            || size < MIN_BLOCK_SIZE
            || size > self.epilogue.offset() - block.offset()
            || block.footer(mem) != header
            || !self.neighbours_agree(block)
        {
            warn!("rejecting pointer {:#x}: no valid block behind it", offset);
            return Err(invalid);
        }

        if !header.is_allocated() {
            warn!("rejecting pointer {:#x}: block is already free", offset);
            return Err(AllocError::DoubleFree { offset });
        }

        Ok(block)
    }

    /// Whether the blocks adjacent to `block` have consistent tags.
    ///
    /// `block` must have a valid header and footer ending at or below the epilogue.
    fn neighbours_agree(&self, block: Block) -> bool {
        let mem = self.region.memory();

        let below = block.prev_tag(mem).size();
        if below > block.offset() - self.prologue.offset() {
            return false;
        }

        let prev = Block(block.offset() - below);
        prev.size(mem) == below && self.has_valid_tags(prev) && self.has_valid_tags(block.next(mem))
    }

    /// Whether `block`, which must start inside the heap, has a header
    /// and matching footer that stay within the heap.
    fn has_valid_tags(&self, block: Block) -> bool {
        let mem = self.region.memory();
        let header = block.header(mem);
        let size = header.size();

        !header.has_stray_bits()
            && size >= TAGS_SIZE
            && size <= mem.len() - block.offset()
            && block.footer(mem) == header
    }

    /// Find or make an allocated block of at least `need` bytes.
    fn allocate_block(&mut self, need: usize) -> Result<Block, AllocError> {
        let block = match self.find_fit(need) {
            Some(block) => {
                let size = block.size(self.region.memory());
                trace!("reusing free {:?} of {:#x} bytes for {:#x}", block, size, need);

                self.deregister(block);
                self.place(block, size, need);
                block
            }
            None => self.grow_heap(need)?,
        };

        #[cfg(feature = "counters")]
        self.counters.account_alloc(block.size(self.region.memory()));

        Ok(block)
    }

    /// First fit, searching once around the free list from its head.
    fn find_fit(&self, need: usize) -> Option<Block> {
        let mem = self.region.memory();
        self.free_list.iter(mem).find(|block| block.size(mem) >= need)
    }

    /// Allocate the unlisted span of `size` bytes at `block`.
    ///
    /// If at least a minimum block is left over beyond `need`, it is split
    /// off the top and registered as free. Otherwise the whole span is used.
    fn place(&mut self, block: Block, size: usize, need: usize) {
        debug_assert!(size >= need);

        if size - need >= MIN_BLOCK_SIZE {
            let rest = Block(block.offset() + need);

            let mem = self.region.memory_mut();
            block.set(mem, need, true);
            rest.set(mem, size - need, false);

            trace!("split {:?}: {:#x} bytes left free at {:?}", block, size - need, rest);
            self.register(rest);
        } else {
            block.set(self.region.memory_mut(), size, true);
        }
    }

    /// Extend the region to make an allocated block of `need` bytes at the top of the heap.
    ///
    /// A free block just below the epilogue is grown in place, so only
    /// the shortfall is requested from the region.
    fn grow_heap(&mut self, need: usize) -> Result<Block, AllocError> {
        let mem = self.region.memory();
        let last = self.epilogue.prev(mem);

        let (block, tail_free) = if last.is_allocated(mem) {
            (self.epilogue, 0)
        } else {
            (last, last.size(mem))
        };
        debug_assert!(tail_free < need);

        self.extend(need - tail_free)?;

        if tail_free != 0 {
            self.deregister(last);
        }

        block.set(self.region.memory_mut(), need, true);
        self.set_epilogue(Block(block.offset() + need));

        Ok(block)
    }

    /// Ask the region for `delta` more bytes above the epilogue.
    fn extend(&mut self, delta: usize) -> Result<(), AllocError> {
        let old_high = isize::try_from(delta)
            .ok()
            .and_then(|delta| self.region.sbrk(delta).ok())
            .ok_or_else(|| {
                warn!("region refused to grow by {:#x} bytes", delta);
                AllocError::OutOfMemory
            })?;

        debug_assert_eq!(old_high, self.epilogue.offset() + TAGS_SIZE, "region is not append-only");
        debug!("heap grew by {:#x} bytes, region high end now {:#x}", delta, old_high + delta);

        #[cfg(feature = "counters")]
        self.counters.account_growth(delta);

        Ok(())
    }

    fn set_epilogue(&mut self, epilogue: Block) {
        epilogue.set(self.region.memory_mut(), TAGS_SIZE, true);
        self.epilogue = epilogue;
    }

    /// Mark `block` free, merging it with whichever neighbours are free.
    fn release(&mut self, block: Block) {
        let mem = self.region.memory();
        let size = block.size(mem);
        let prev = block.prev(mem);
        let next = block.next(mem);

        // the sentinels are allocated, so neither lookup leaves the heap
        let prev_free = (!prev.is_allocated(mem)).then(|| prev.size(mem));
        let next_free = (!next.is_allocated(mem)).then(|| next.size(mem));

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(size);

        let (base, total) = match (prev_free, next_free) {
            (None, None) => (block, size),
            (Some(prev_size), None) => {
                self.deregister(prev);
                (prev, prev_size + size)
            }
            (None, Some(next_size)) => {
                self.deregister(next);
                (block, size + next_size)
            }
            (Some(prev_size), Some(next_size)) => {
                self.deregister(prev);
                self.deregister(next);
                (prev, prev_size + size + next_size)
            }
        };

        trace!("freed {:?}: free span {:?} of {:#x} bytes", block, base, total);

        let mem = self.region.memory_mut();
        if base != block {
            block.clear_header(mem);
        }
        base.set(mem, total, false);
        self.register(base);
    }

    /// Shrink an allocated block of `current` bytes to `need` bytes,
    /// unless the excess is too small to form a block of its own.
    fn shrink_in_place(&mut self, block: Block, current: usize, need: usize) {
        let excess = current - need;
        if excess < MIN_BLOCK_SIZE {
            trace!("shrink of {:?} keeps {:#x} bytes, excess too small", block, current);
            return;
        }

        let next = Block(block.offset() + current);
        let mem = self.region.memory();
        let next_free = (!next.is_allocated(mem)).then(|| next.size(mem));

        let rest_size = match next_free {
            Some(next_size) => {
                self.deregister(next);
                excess + next_size
            }
            None => excess,
        };

        let rest = Block(block.offset() + need);
        let mem = self.region.memory_mut();
        block.set(mem, need, true);
        rest.set(mem, rest_size, false);
        self.register(rest);

        trace!("shrank {:?} to {:#x} bytes", block, need);

        #[cfg(feature = "counters")]
        self.counters.account_resize_in_place(current, need);
    }

    /// Grow an allocated block of `current` bytes to at least `need` bytes,
    /// returning where the block ended up.
    fn grow(&mut self, block: Block, current: usize, need: usize) -> Result<Block, AllocError> {
        let mem = self.region.memory();
        let next = block.next(mem);
        let next_free = (!next.is_allocated(mem)).then(|| next.size(mem));
        let prev = block.prev(mem);
        let prev_free = (!prev.is_allocated(mem)).then(|| prev.size(mem));
        let adjacent = current + next_free.unwrap_or(0);

        if adjacent >= need {
            // the free block above covers the difference
            self.deregister(next);
            self.place(block, adjacent, need);

            trace!("grew {:?} in place into {:?}", block, next);

            #[cfg(feature = "counters")]
            self.counters.account_resize_in_place(current, block.size(self.region.memory()));

            return Ok(block);
        }

        if let Some(prev_size) = prev_free.filter(|&prev_size| prev_size + adjacent >= need) {
            // merge with the free block below and slide the payload down
            self.deregister(prev);
            if next_free.is_some() {
                self.deregister(next);
            }

            let len = current - TAGS_SIZE;
            let src = block.payload_offset();
            let mem = self.region.memory_mut();
            block.clear_header(mem);
            mem.copy_within(src..src + len, prev.payload_offset());

            self.place(prev, prev_size + adjacent, need);

            trace!("grew {:?} by merging down into {:?}", block, prev);

            #[cfg(feature = "counters")]
            self.counters.account_resize_in_place(current, prev.size(self.region.memory()));

            return Ok(prev);
        }

        let above = match next_free {
            Some(next_size) => Block(next.offset() + next_size),
            None => next,
        };

        if above == self.epilogue {
            // top of the heap: take the shortfall from the region
            self.extend(need - adjacent)?;

            if next_free.is_some() {
                self.deregister(next);
            }

            block.set(self.region.memory_mut(), need, true);
            self.set_epilogue(Block(block.offset() + need));

            trace!("grew {:?} in place at the top of the heap", block);

            #[cfg(feature = "counters")]
            self.counters.account_resize_in_place(current, need);

            return Ok(block);
        }

        // both blocks stay allocated until the copy is done, so they can't overlap
        let moved = self.allocate_block(need)?;
        let len = current - TAGS_SIZE;
        let src = block.payload_offset();
        self.region.memory_mut().copy_within(src..src + len, moved.payload_offset());
        self.release(block);

        trace!("moved {:?} to {:?}", block, moved);

        Ok(moved)
    }

    /// Add a free block to the free list.
    #[inline]
    fn register(&mut self, block: Block) {
        let mem = self.region.memory_mut();
        self.free_list.insert(mem, block);

        #[cfg(feature = "counters")]
        self.counters.account_register_gap(block.size(mem));
    }

    /// Take a free block off the free list.
    #[inline]
    fn deregister(&mut self, block: Block) {
        let mem = self.region.memory_mut();
        self.free_list.remove(mem, block);

        #[cfg(feature = "counters")]
        self.counters.account_deregister_gap(block.size(mem));
    }

    #[cfg(not(any(test, feature = "error-scanning")))]
    #[inline]
    fn scan_for_errors(&self) {}

    #[cfg(any(test, feature = "error-scanning"))]
    /// Debugging hook run after every mutation, panicking on a broken invariant.
    #[track_caller]
    fn scan_for_errors(&self) {
        if let Err(err) = self.validate() {
            panic!("{}", err);
        }
    }
}

/// Iterator over every block of a [`Heap`], created by [`Heap::blocks`].
#[derive(Debug, Clone)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Blocks<'h> {
    mem: &'h [u8],
    cursor: Option<Block>,
    epilogue: Block,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor?;
        let info = BlockInfo::of(block, self.mem);

        // a zero size can only come from corruption; stop rather than spin
        self.cursor = if block == self.epilogue || info.size == 0 {
            None
        } else {
            Some(Block(block.offset() + info.size))
        };

        Some(info)
    }
}
