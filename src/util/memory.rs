use crate::util::Address;
use std::io::{Error, Result};

pub fn zero(start: Address, len: usize) {
    unsafe { libc::memset(start.to_mut_ptr(), 0, len) };
}

/// Demand-zero mmap of `size` bytes at an address chosen by the OS, aligned to `align`.
///
/// The mapping is over-reserved by `align` bytes and the unaligned head and tail are
/// returned to the OS, so the result is exactly `size` bytes starting at an `align`
/// boundary. Anonymous private mappings are zero-filled.
pub fn dzmmap_aligned(size: usize, align: usize) -> Result<Address> {
    debug_assert!(align.is_power_of_two());
    debug_assert!(crate::util::conversions::is_page_aligned(unsafe {
        Address::from_usize(size)
    }));
    let reserve = size + align;
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), reserve, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    let raw = Address::from_mut_ptr(ptr);
    let start = raw.align_up(align);
    let head = start - raw;
    if head != 0 {
        munmap(raw, head)?;
    }
    let tail = reserve - head - size;
    if tail != 0 {
        munmap(start + size, tail)?;
    }
    trace!("dzmmap_aligned: {} bytes at {} (align {})", size, start, align);
    Ok(start)
}

pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

pub fn munprotect(start: Address, size: usize) -> Result<()> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    wrap_libc_call(&|| unsafe { libc::mprotect(start.to_mut_ptr(), size, prot) }, 0)
}

pub fn mprotect(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::mprotect(start.to_mut_ptr(), size, libc::PROT_NONE) }, 0)
}

/// Give the pages back to the OS. The range stays mapped and reads as zero afterwards.
pub fn decommit(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::madvise(start.to_mut_ptr(), size, libc::MADV_DONTNEED) }, 0)
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::{BYTES_IN_PAGE, DEFAULT_REGION_SIZE};

    #[test]
    fn test_mmap_aligned() {
        let start = dzmmap_aligned(DEFAULT_REGION_SIZE * 2, DEFAULT_REGION_SIZE).unwrap();
        assert!(start.is_aligned_to(DEFAULT_REGION_SIZE));
        // The memory is readable and zeroed
        unsafe {
            assert_eq!(start.load::<usize>(), 0);
            assert_eq!((start + (DEFAULT_REGION_SIZE * 2 - 8)).load::<usize>(), 0);
            start.store::<usize>(42);
            assert_eq!(start.load::<usize>(), 42);
        }
        zero(start, BYTES_IN_PAGE);
        assert_eq!(unsafe { start.load::<usize>() }, 0);
        assert!(munmap(start, DEFAULT_REGION_SIZE * 2).is_ok());
    }

    #[test]
    fn protect_and_decommit() {
        let size = DEFAULT_REGION_SIZE;
        let start = dzmmap_aligned(size, DEFAULT_REGION_SIZE).unwrap();
        assert!(mprotect(start, size).is_ok());
        assert!(munprotect(start, size).is_ok());
        unsafe { start.store::<usize>(42) };
        assert!(decommit(start, size).is_ok());
        assert_eq!(unsafe { start.load::<usize>() }, 0);
        assert!(munmap(start, size).is_ok());
    }
}
