use thiserror::Error;

/// Errors reported by [`Heap`](crate::Heap) operations.
///
/// No failing operation leaves partial state behind: the heap is
/// exactly as it was before the call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-byte allocation was requested.
    #[error("allocation size must be at least one byte")]
    InvalidSize,

    /// The region could not be extended to satisfy the request.
    #[error("out of memory")]
    OutOfMemory,

    /// The pointer does not address the payload of a block in this heap.
    #[error("pointer {offset:#x} was not allocated by this heap")]
    InvalidPointer {
        /// Payload offset passed in.
        offset: usize,
    },

    /// The pointer addresses a block that is already free.
    #[error("pointer {offset:#x} was already freed")]
    DoubleFree {
        /// Payload offset passed in.
        offset: usize,
    },

    /// A consistency check found a broken heap invariant.
    #[error("heap corrupted at {offset:#x}: {reason}")]
    Corrupted {
        /// Offset of the offending block.
        offset: usize,
        /// The invariant that does not hold.
        reason: &'static str,
    },
}
