//! The memory the heap is carved from.
//!
//! A [`Region`] is a contiguous byte range whose high end can be moved,
//! exactly like a program break. The heap only ever grows it, and only
//! when no free block satisfies a request.

use alloc::vec::Vec;

/// A growable contiguous byte range.
///
/// Offsets handed out by the heap index into [`Region::memory`], so the
/// bytes below the high end must never move relative to each other.
/// The backing storage itself may relocate (a `Vec` reallocating, say)
/// as nothing holds raw addresses into it.
pub trait Region {
    /// Move the high end by `delta` bytes, returning the high end
    /// from before the call, or `Err(())` if the region can't comply.
    ///
    /// Newly exposed bytes may hold anything.
    fn sbrk(&mut self, delta: isize) -> Result<usize, ()>;

    /// Bytes below the high end.
    fn memory(&self) -> &[u8];

    /// Bytes below the high end.
    fn memory_mut(&mut self) -> &mut [u8];

    /// Current high end, equal to the length of [`Region::memory`].
    #[inline]
    fn high(&self) -> usize {
        self.memory().len()
    }
}

/// Computes the high end after moving `brk` by `delta`, bounded by `limit`.
fn moved_brk(brk: usize, delta: isize, limit: usize) -> Result<usize, ()> {
    let new_brk = if delta >= 0 {
        brk.checked_add(delta.unsigned_abs()).ok_or(())?
    } else {
        brk.checked_sub(delta.unsigned_abs()).ok_or(())?
    };

    if new_brk > limit {
        return Err(());
    }

    Ok(new_brk)
}

/// An owned region backed by a `Vec<u8>`, optionally capped at a byte limit.
#[derive(Debug, Clone)]
pub struct VecRegion {
    mem: Vec<u8>,
    limit: usize,
}

impl VecRegion {
    /// An empty region that grows until the global allocator gives up.
    pub const fn new() -> Self {
        Self { mem: Vec::new(), limit: usize::MAX }
    }

    /// An empty region that refuses to grow beyond `limit` bytes.
    pub const fn with_limit(limit: usize) -> Self {
        Self { mem: Vec::new(), limit }
    }

    /// The maximum number of bytes this region will hold.
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for VecRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl Region for VecRegion {
    fn sbrk(&mut self, delta: isize) -> Result<usize, ()> {
        let brk = self.mem.len();
        let new_brk = moved_brk(brk, delta, self.limit)?;

        if new_brk > brk {
            self.mem.try_reserve_exact(new_brk - brk).map_err(|_| ())?;
        }
        self.mem.resize(new_brk, 0);

        Ok(brk)
    }

    #[inline]
    fn memory(&self) -> &[u8] {
        &self.mem
    }

    #[inline]
    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }
}

/// A region over a borrowed, fixed-size buffer.
///
/// The high end starts at zero and can move up to the end of the buffer.
#[derive(Debug)]
pub struct SliceRegion<'a> {
    mem: &'a mut [u8],
    brk: usize,
}

impl<'a> SliceRegion<'a> {
    /// A region over `mem`, initially empty.
    pub fn new(mem: &'a mut [u8]) -> Self {
        Self { mem, brk: 0 }
    }

    /// Total bytes available to the region.
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Release the buffer.
    pub fn into_inner(self) -> &'a mut [u8] {
        self.mem
    }
}

impl Region for SliceRegion<'_> {
    fn sbrk(&mut self, delta: isize) -> Result<usize, ()> {
        let brk = self.brk;
        self.brk = moved_brk(brk, delta, self.mem.len())?;
        Ok(brk)
    }

    #[inline]
    fn memory(&self) -> &[u8] {
        &self.mem[..self.brk]
    }

    #[inline]
    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.mem[..self.brk]
    }
}
