/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// log2 of the allocation granule. Every object starts on this alignment.
pub const LOG_DEFAULT_ALIGNMENT: u8 = 3;
/// The allocation granule in bytes.
pub const DEFAULT_ALIGNMENT: usize = 1 << LOG_DEFAULT_ALIGNMENT;

/// log2 of the default region size (256 KiB).
pub const LOG_DEFAULT_REGION_SIZE: usize = 18;
/// The default region size in bytes.
pub const DEFAULT_REGION_SIZE: usize = 1 << LOG_DEFAULT_REGION_SIZE;

/// log2 of the number of heap bytes covered by one card.
pub const LOG_BYTES_IN_CARD: u8 = 9;
/// The number of heap bytes covered by one card.
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;

/// The default heap size reserved for the region block.
pub const DEFAULT_HEAP_SIZE: usize = 64 << LOG_BYTES_IN_MBYTE;

static_assertions::const_assert!(DEFAULT_REGION_SIZE.is_power_of_two());
static_assertions::const_assert!(DEFAULT_REGION_SIZE % BYTES_IN_CARD == 0);
static_assertions::const_assert!(DEFAULT_REGION_SIZE % BYTES_IN_PAGE == 0);
