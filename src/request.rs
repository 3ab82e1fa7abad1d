//! Slab or bulk dispatch for typed requests.
//!
//! Only single-object requests are served from the slab; node-based
//! containers ask for exactly one node at a time. Everything else goes to
//! the global heap.

use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;

use crate::object::ObjectCache;
use crate::page::MemoryMapper;
use crate::{AllocError, AllocResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    /// Zero bytes requested; served by a dangling pointer.
    Empty,
    /// One object from the slab.
    Slab,
    /// Anything else, from the global heap.
    Bulk(Layout),
}

impl Request {
    pub fn classify<T>(count: usize) -> AllocResult<Self> {
        if count == 1 {
            return Ok(Self::Slab);
        }
        let layout = Layout::array::<T>(count).map_err(|_| AllocError::InvalidParam)?;
        if layout.size() == 0 {
            Ok(Self::Empty)
        } else {
            Ok(Self::Bulk(layout))
        }
    }
}

pub(crate) fn allocate<T, M: MemoryMapper>(
    cache: &mut ObjectCache<M>,
    count: usize,
) -> AllocResult<NonNull<T>> {
    match Request::classify::<T>(count)? {
        Request::Empty => Ok(NonNull::dangling()),
        Request::Slab => cache.allocate_one().map(NonNull::cast),
        Request::Bulk(layout) => {
            let ptr = unsafe { alloc(layout) };
            NonNull::new(ptr.cast::<T>()).ok_or(AllocError::NoMemory)
        }
    }
}

/// # Safety
///
/// `ptr` must come from [`allocate`] on the same cache with the same `count`.
pub(crate) unsafe fn deallocate<T, M: MemoryMapper>(
    cache: &mut ObjectCache<M>,
    ptr: NonNull<T>,
    count: usize,
) -> AllocResult {
    match Request::classify::<T>(count)? {
        Request::Empty => Ok(()),
        Request::Slab => cache.deallocate_one(ptr.cast()),
        Request::Bulk(layout) => {
            unsafe { dealloc(ptr.as_ptr().cast(), layout) };
            Ok(())
        }
    }
}
