//! Word sizing and alignment helpers.

/// Size of a machine word, the unit of every tag and link.
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();
/// Alignment of block offsets, sizes and payloads.
pub const ALIGN: usize = WORD_SIZE;

/// Returns whether rounding `size` up to the next word would overflow.
#[inline]
pub fn align_up_overflows(size: usize) -> bool {
    ALIGN - 1 > usize::MAX - size
}

/// Rounds `size` up to the nearest multiple of [`ALIGN`].
#[inline]
pub fn align_up(size: usize) -> usize {
    debug_assert!(!align_up_overflows(size));

    (size + (ALIGN - 1)) & !(ALIGN - 1)
}

#[inline]
pub fn is_aligned(offset: usize) -> bool {
    offset % ALIGN == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_size_test() {
        assert!(!align_up_overflows(0));
        assert!(!align_up_overflows(usize::MAX - (ALIGN - 1)));
        assert!(align_up_overflows(usize::MAX - (ALIGN - 2)));
        assert!(align_up_overflows(usize::MAX));

        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), ALIGN);
        assert_eq!(align_up(ALIGN - 1), ALIGN);
        assert_eq!(align_up(ALIGN), ALIGN);
        assert_eq!(align_up(ALIGN + 1), 2 * ALIGN);

        for i in 0..10 {
            for size in (ALIGN * i + 1)..=(ALIGN * (i + 1)) {
                assert_eq!(align_up(size), ALIGN * (i + 1));
            }
        }

        assert!(is_aligned(0));
        assert!(is_aligned(3 * ALIGN));
        assert!(!is_aligned(ALIGN + 1));
    }
}
