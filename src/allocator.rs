//! Typed allocator facade.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::config::AllocatorConfig;
use crate::object::ObjectCache;
#[cfg(unix)]
use crate::page::AnonymousMapper;
use crate::page::MemoryMapper;
use crate::request;
use crate::stats::{AllocatorStats, Teardown};
use crate::{AllocResult, NodeAllocator, Rebind};

/// Slab allocator for values of type `T`, backed by pages from `M`.
///
/// Single-object requests are served from page-carved slots; any other
/// count goes to the global heap. The allocator exclusively owns every page
/// it maps. Moving it moves that ownership; use [`ObjectAllocator::take`] to
/// move it out from behind a reference.
///
/// Dropping the allocator unmaps everything unless objects are still
/// outstanding, in which case the pages are leaked and an error is logged.
///
/// On unix the mapper defaults to [`AnonymousMapper`]; other targets must
/// supply their own.
pub struct ObjectAllocator<
    T,
    #[cfg(unix)] M: MemoryMapper = AnonymousMapper,
    #[cfg(not(unix))] M: MemoryMapper,
> {
    cache: ObjectCache<M>,
    _marker: PhantomData<fn() -> T>,
}

#[cfg(unix)]
impl<T> ObjectAllocator<T> {
    /// Allocator over anonymous mappings with the default configuration.
    pub fn new() -> AllocResult<Self> {
        Self::with_config(AllocatorConfig::new())
    }

    pub fn with_config(config: AllocatorConfig) -> AllocResult<Self> {
        Self::with_mapper(AnonymousMapper, config)
    }
}

impl<T, M: MemoryMapper> ObjectAllocator<T, M> {
    /// Fails with [`AllocError::ObjectTooLarge`](crate::AllocError::ObjectTooLarge)
    /// if `T` does not fit a page, or `InvalidParam` for a bad `config`.
    pub fn with_mapper(mapper: M, config: AllocatorConfig) -> AllocResult<Self> {
        Ok(Self {
            cache: ObjectCache::new(mapper, config, Layout::new::<T>())?,
            _marker: PhantomData,
        })
    }

    /// Allocate uninitialized storage for `count` values.
    ///
    /// `count == 1` is served from the slab. `count == 0` returns a dangling
    /// pointer.
    pub fn allocate(&mut self, count: usize) -> AllocResult<NonNull<T>> {
        request::allocate(&mut self.cache, count)
    }

    /// Return storage obtained from [`ObjectAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate(count)` on this allocator with the same
    /// `count`, and must not be used afterwards. Any value in it must already
    /// have been dropped or moved out.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>, count: usize) -> AllocResult {
        unsafe { request::deallocate(&mut self.cache, ptr, count) }
    }

    /// Reserve one uninitialized slot.
    pub fn reserve(&mut self) -> AllocResult<NonNull<T>> {
        self.cache.allocate_one().map(NonNull::cast)
    }

    /// Move `value` into a fresh slot.
    pub fn insert(&mut self, value: T) -> AllocResult<NonNull<T>> {
        let ptr = self.reserve()?;
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Move the value out of `ptr` and release its slot.
    ///
    /// # Safety
    ///
    /// `ptr` must hold an initialized value placed by [`ObjectAllocator::insert`]
    /// or constructed into a slot from [`ObjectAllocator::reserve`] on this
    /// allocator.
    pub unsafe fn remove(&mut self, ptr: NonNull<T>) -> AllocResult<T> {
        self.cache.deallocate_one(ptr.cast())?;
        // The slot stays mapped and the lists never write into it
        Ok(unsafe { ptr.as_ptr().read() })
    }

    /// Whether `ptr` lies inside a page owned by this allocator.
    pub fn contains(&self, ptr: *const T) -> bool {
        self.cache.contains(ptr as usize)
    }

    /// Size of one object.
    pub fn object_size(&self) -> usize {
        core::mem::size_of::<T>()
    }

    pub fn config(&self) -> &AllocatorConfig {
        self.cache.config()
    }

    pub fn mapper(&self) -> &M {
        self.cache.mapper()
    }

    pub fn objects_per_page(&self) -> usize {
        self.cache.objects_per_page()
    }

    pub fn free_count(&self) -> usize {
        self.cache.free_count()
    }

    pub fn used_count(&self) -> usize {
        self.cache.used_count()
    }

    pub fn page_stack_size(&self) -> usize {
        self.cache.page_stack_size()
    }

    pub fn descriptor_stack_size(&self) -> usize {
        self.cache.descriptor_stack_size()
    }

    pub fn carved_pages(&self) -> usize {
        self.cache.carved_pages()
    }

    pub fn total_carved(&self) -> usize {
        self.cache.total_carved()
    }

    pub fn stats(&self) -> AllocatorStats {
        self.cache.stats()
    }

    /// Take over every page and descriptor, leaving `self` empty.
    pub fn take(&mut self) -> Self
    where
        M: Clone,
    {
        Self {
            cache: self.cache.take(),
            _marker: PhantomData,
        }
    }

    /// Tear the allocator down and report what happened to its pages.
    pub fn release(mut self) -> Teardown {
        self.cache.teardown()
    }

    /// A fresh allocator for `U` with the same configuration and a clone of
    /// the mapper. Nothing is shared with `self`.
    pub fn rebind<U>(&self) -> AllocResult<ObjectAllocator<U, M>>
    where
        M: Clone,
    {
        ObjectAllocator::with_mapper(self.cache.mapper().clone(), *self.cache.config())
    }
}

impl<T, M: MemoryMapper> NodeAllocator<T> for ObjectAllocator<T, M> {
    fn allocate(&mut self, count: usize) -> AllocResult<NonNull<T>> {
        ObjectAllocator::allocate(self, count)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<T>, count: usize) -> AllocResult {
        unsafe { ObjectAllocator::deallocate(self, ptr, count) }
    }

    fn contains(&self, ptr: NonNull<T>) -> bool {
        ObjectAllocator::contains(self, ptr.as_ptr())
    }
}

impl<T, M: MemoryMapper + Clone> Rebind for ObjectAllocator<T, M> {
    type Rebound<U> = ObjectAllocator<U, M>;

    fn rebind<U>(&self) -> AllocResult<ObjectAllocator<U, M>> {
        ObjectAllocator::rebind(self)
    }
}

impl<T, M: MemoryMapper> core::fmt::Debug for ObjectAllocator<T, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectAllocator")
            .field("type", &core::any::type_name::<T>())
            .field("stats", &self.stats())
            .finish()
    }
}
