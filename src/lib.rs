//! Page-backed object allocator
//!
//! A single-object slab allocator for node-based containers:
//! - Pages are mapped from the OS (anonymous `mmap` by default) and carved
//!   into equally sized object slots in one batch
//! - Free and used slots are tracked by descriptors living in page-backed
//!   arenas. Page records and descriptors are stored in mapped pages; only
//!   the small directory of arena blocks lives on the heap
//! - Requests for anything other than exactly one object go to the global heap
//! - Shared pools let several containers draw from the same pages
//!
//! The allocator is single-threaded. Nothing is returned to the OS before
//! teardown, and nothing at all is unmapped while objects are outstanding.

#![no_std]

extern crate alloc;

use core::fmt;
use core::ptr::NonNull;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid configuration, request size or rebind target.
    InvalidParam,
    /// The object does not fit in one page.
    ObjectTooLarge,
    /// The OS or the global heap could not supply memory.
    NoMemory,
    /// Deallocate with no outstanding allocation.
    NotAllocated,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AllocError::InvalidParam => "invalid parameter",
            AllocError::ObjectTooLarge => "object larger than a page",
            AllocError::NoMemory => "out of memory",
            AllocError::NotAllocated => "deallocation without a matching allocation",
        };
        f.write_str(msg)
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Allocator protocol consumed by node-based containers.
///
/// Containers request exactly one node at a time; other counts are still
/// accepted and served from the global heap.
pub trait NodeAllocator<T> {
    /// Allocate uninitialized storage for `count` values of `T`.
    fn allocate(&mut self, count: usize) -> AllocResult<NonNull<T>>;

    /// Deallocate storage returned by [`NodeAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate(count)` on this allocator (or one
    /// sharing its storage) with the same `count`. Values in it must already
    /// be dropped or moved out.
    unsafe fn deallocate(&mut self, ptr: NonNull<T>, count: usize) -> AllocResult;

    /// Move `value` into uninitialized storage.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and hold no live value.
    unsafe fn construct(&mut self, ptr: NonNull<T>, value: T) {
        unsafe { ptr.as_ptr().write(value) }
    }

    /// Drop the value at `ptr` in place, leaving the storage allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must hold an initialized value that is not used afterwards.
    unsafe fn destroy(&mut self, ptr: NonNull<T>) {
        unsafe { ptr.as_ptr().drop_in_place() }
    }

    /// Whether `ptr` lies in storage owned by this allocator's pages.
    fn contains(&self, ptr: NonNull<T>) -> bool;

    /// Size of the object at `ptr`. Always the size of `T`.
    fn size(&self, _ptr: NonNull<T>) -> usize {
        core::mem::size_of::<T>()
    }
}

/// Obtain an allocator of the same kind for another element type, the way
/// a container turns its value allocator into a node allocator.
pub trait Rebind {
    type Rebound<U>: NodeAllocator<U>;

    fn rebind<U>(&self) -> AllocResult<Self::Rebound<U>>;
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod config;
pub use config::{AllocatorConfig, UnderflowPolicy, DEFAULT_BLOCK_CAPACITY, DEFAULT_PAGE_SIZE};

pub mod page;
#[cfg(unix)]
pub use page::AnonymousMapper;
pub use page::{MemoryMapper, Page, PageProvider};

mod arena;

pub mod object;
pub use object::ObjectCache;

mod request;

pub mod allocator;
pub use allocator::ObjectAllocator;

pub mod pool;
pub use pool::PoolHandle;

pub mod stats;
#[cfg(feature = "tracking")]
pub use stats::LifetimeCounters;
pub use stats::{AllocatorStats, Teardown};
