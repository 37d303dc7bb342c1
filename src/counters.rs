//! Track allocation statistics for the heap.

use crate::block::TAGS_SIZE;

/// Allocation statistics for [`Heap`](crate::Heap).
///
/// # Example
///
/// ```
/// # use tagfit::{Heap, VecRegion};
/// let mut heap = Heap::init(VecRegion::new()).unwrap();
/// let ptr = heap.allocate(100).unwrap();
/// assert_eq!(heap.counters().allocation_count, 1);
/// heap.free(Some(ptr)).unwrap();
/// eprintln!("{}", heap.counters());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counters {
    /// Number of active allocations.
    pub allocation_count: usize,
    /// Total number of allocations, resizes that moved included.
    pub total_allocation_count: u64,

    /// Sum of active allocations' usable payload bytes.
    pub allocated_bytes: usize,

    /// Sum of free blocks' sizes.
    pub available_bytes: usize,
    /// Number of free blocks.
    pub fragment_count: usize,

    /// Bytes managed by the heap, sentinels included.
    pub heap_bytes: usize,
    /// Number of times the region was extended.
    pub growth_count: u64,
}

impl Counters {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self {
            allocation_count: 0,
            total_allocation_count: 0,
            allocated_bytes: 0,
            available_bytes: 0,
            fragment_count: 0,
            heap_bytes: 0,
            growth_count: 0,
        }
    }

    /// Returns the number of bytes taken by boundary tags and sentinels.
    #[inline]
    pub const fn overhead_bytes(&self) -> usize {
        self.heap_bytes - self.available_bytes - self.allocated_bytes
    }

    #[inline]
    pub(crate) fn account_register_gap(&mut self, size: usize) {
        self.available_bytes += size;
        self.fragment_count += 1;
    }

    #[inline]
    pub(crate) fn account_deregister_gap(&mut self, size: usize) {
        self.available_bytes -= size;
        self.fragment_count -= 1;
    }

    #[inline]
    pub(crate) fn account_alloc(&mut self, block_size: usize) {
        self.allocation_count += 1;
        self.total_allocation_count += 1;
        self.allocated_bytes += block_size - TAGS_SIZE;
    }

    #[inline]
    pub(crate) fn account_dealloc(&mut self, block_size: usize) {
        self.allocation_count -= 1;
        self.allocated_bytes -= block_size - TAGS_SIZE;
    }

    #[inline]
    pub(crate) fn account_resize_in_place(&mut self, old_block_size: usize, new_block_size: usize) {
        self.allocated_bytes = self.allocated_bytes + new_block_size - old_block_size;
    }

    #[inline]
    pub(crate) fn account_growth(&mut self, delta: usize) {
        self.heap_bytes += delta;
        self.growth_count += 1;
    }
}

impl core::fmt::Display for Counters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            r#"Stat                 | Current Total       | Accumulative Total
---------------------|---------------------|--------------------
# of Allocations     | {:>19} | {:>19}
# of Allocated Bytes | {:>19} |                 N/A
# of Available Bytes | {:>19} |                 N/A
# of Overhead Bytes  | {:>19} |                 N/A
# of Heap Bytes      | {:>19} |                 N/A
# of Growths         |                 N/A | {:>19}
# of Fragments       | {:>19} |                 N/A"#,
            self.allocation_count,
            self.total_allocation_count,
            self.allocated_bytes,
            self.available_bytes,
            self.overhead_bytes(),
            self.heap_bytes,
            self.growth_count,
            self.fragment_count,
        )
    }
}

impl<S: crate::Region> crate::Heap<S> {
    /// Obtain a reference to the internal allocation statistics.
    ///
    /// When the heap sits behind a [`Locked`](crate::Locked), holding onto
    /// the reference holds the lock. Copying the struct out is recommended.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}
