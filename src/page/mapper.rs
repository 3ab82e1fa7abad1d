//! Raw memory mapping backends.

use core::ptr::NonNull;

#[cfg(all(unix, feature = "log"))]
use log::error;

#[cfg(unix)]
use crate::AllocError;
use crate::AllocResult;

/// Raw OS memory-mapping facility.
///
/// Mappings must be readable, writable and aligned to at least
/// `min(size, 4096)` bytes.
pub trait MemoryMapper {
    /// Whether fresh mappings are already zero-filled.
    const ZEROED: bool = false;

    /// Map `size` bytes.
    fn map(&mut self, size: usize) -> AllocResult<NonNull<u8>>;

    /// Unmap a region returned by [`MemoryMapper::map`].
    ///
    /// # Safety
    ///
    /// `addr` and `size` must describe exactly one live mapping obtained from
    /// this mapper, and nothing may access the region afterwards.
    unsafe fn unmap(&mut self, addr: NonNull<u8>, size: usize);
}

/// Private anonymous `mmap` mappings.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnonymousMapper;

#[cfg(unix)]
impl MemoryMapper for AnonymousMapper {
    const ZEROED: bool = true;

    fn map(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::InvalidParam);
        }

        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            error!("anonymous mapper: mmap of {:#x} bytes failed", size);
            return Err(AllocError::NoMemory);
        }

        NonNull::new(addr.cast::<u8>()).ok_or(AllocError::NoMemory)
    }

    unsafe fn unmap(&mut self, addr: NonNull<u8>, size: usize) {
        let ret = unsafe { libc::munmap(addr.as_ptr().cast(), size) };
        if ret != 0 {
            error!(
                "anonymous mapper: munmap of {:#x} bytes at {:#x} failed",
                size,
                addr.as_ptr() as usize
            );
        }
    }
}
