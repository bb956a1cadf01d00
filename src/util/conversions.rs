use crate::util::constants::*;
use crate::util::Address;

/* Alignment */

pub fn is_page_aligned(address: Address) -> bool {
    address.is_aligned_to(BYTES_IN_PAGE)
}

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/// Round an allocation request up to the allocation granule.
pub const fn align_object_size(size: usize) -> usize {
    raw_align_up(size, DEFAULT_ALIGNMENT)
}

/// log2 of a power of two.
pub const fn log2(value: usize) -> usize {
    debug_assert!(value.is_power_of_two());
    value.trailing_zeros() as usize
}

#[cfg(test)]
mod tests {
    use crate::util::conversions::*;
    use crate::util::Address;

    #[test]
    fn test_page_align() {
        let addr = unsafe { Address::from_usize(0x123456789) };
        assert!(!is_page_aligned(addr));
        assert!(is_page_aligned(addr.align_down(BYTES_IN_PAGE)));
    }

    #[test]
    fn test_object_size_alignment() {
        assert_eq!(align_object_size(0), 0);
        assert_eq!(align_object_size(1), 8);
        assert_eq!(align_object_size(8), 8);
        assert_eq!(align_object_size(13), 16);
    }

    #[test]
    fn test_log2() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(512), 9);
        assert_eq!(log2(256 * 1024), 18);
    }
}
