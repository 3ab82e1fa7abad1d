//! Shared object pools.
//!
//! A [`PoolHandle`] is a cheap, clonable reference to one [`ObjectCache`].
//! Every clone and every rebound handle allocates from the same pages, so
//! several containers can draw nodes from one pool. The pool is torn down
//! when the last handle goes away.

use alloc::rc::Rc;
use core::alloc::Layout;
use core::cell::RefCell;
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

/// Reference-counted handle to a shared pool of `T`-sized slots.
pub struct PoolHandle<
    T,
    #[cfg(unix)] M: MemoryMapper = AnonymousMapper,
    #[cfg(not(unix))] M: MemoryMapper,
> {
    pool: Rc<RefCell<ObjectCache<M>>>,
    _marker: PhantomData<fn() -> T>,
}

#[cfg(unix)]
impl<T> PoolHandle<T> {
    pub fn new() -> AllocResult<Self> {
        Self::with_config(AllocatorConfig::new())
    }

    pub fn with_config(config: AllocatorConfig) -> AllocResult<Self> {
        Self::with_mapper(AnonymousMapper, config)
    }
}

impl<T, M: MemoryMapper> PoolHandle<T, M> {
    pub fn with_mapper(mapper: M, config: AllocatorConfig) -> AllocResult<Self> {
        let cache = ObjectCache::new(mapper, config, Layout::new::<T>())?;
        Ok(Self {
            pool: Rc::new(RefCell::new(cache)),
            _marker: PhantomData,
        })
    }

    pub fn allocate(&self, count: usize) -> AllocResult<NonNull<T>> {
        request::allocate(&mut *self.pool.borrow_mut(), count)
    }

    /// # Safety
    ///
    /// `ptr` must come from `allocate(count)` on a handle to the same pool,
    /// with the same `count` and element type.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) -> AllocResult {
        unsafe { request::deallocate(&mut *self.pool.borrow_mut(), ptr, count) }
    }

    pub fn insert(&self, value: T) -> AllocResult<NonNull<T>> {
        let ptr = self.pool.borrow_mut().allocate_one()?.cast::<T>();
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// # Safety
    ///
    /// `ptr` must hold an initialized `T` placed in this pool.
    pub unsafe fn remove(&self, ptr: NonNull<T>) -> AllocResult<T> {
        self.pool.borrow_mut().deallocate_one(ptr.cast())?;
        Ok(unsafe { ptr.as_ptr().read() })
    }

    pub fn contains(&self, ptr: *const T) -> bool {
        self.pool.borrow().contains(ptr as usize)
    }

    /// Number of handles sharing the pool, this one included.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.pool)
    }

    pub fn stats(&self) -> AllocatorStats {
        self.pool.borrow().stats()
    }

    /// A handle to the same pool for values of type `U`.
    ///
    /// The pool's slots must be able to hold `U`. A pool that has not
    /// carved any page yet widens its slots to fit; otherwise rebinding to a
    /// larger or more strictly aligned type fails with `InvalidParam`.
    pub fn rebind<U>(&self) -> AllocResult<PoolHandle<U, M>> {
        self.pool.borrow_mut().accommodate(Layout::new::<U>())?;
        Ok(PoolHandle {
            pool: Rc::clone(&self.pool),
            _marker: PhantomData,
        })
    }

    /// Drop this handle. If it was the last one, the pool is torn down and
    /// the outcome returned.
    pub fn release(self) -> Option<Teardown> {
        let cell = Rc::try_unwrap(self.pool).ok()?;
        let mut cache = cell.into_inner();
        Some(cache.teardown())
    }
}

impl<T, M: MemoryMapper> Clone for PoolHandle<T, M> {
    fn clone(&self) -> Self {
        Self {
            pool: Rc::clone(&self.pool),
            _marker: PhantomData,
        }
    }
}

impl<T, U, M: MemoryMapper> PartialEq<PoolHandle<U, M>> for PoolHandle<T, M> {
    fn eq(&self, other: &PoolHandle<U, M>) -> bool {
        Rc::ptr_eq(&self.pool, &other.pool)
    }
}

impl<T, M: MemoryMapper> Eq for PoolHandle<T, M> {}

impl<T, M: MemoryMapper> core::fmt::Debug for PoolHandle<T, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("type", &core::any::type_name::<T>())
            .field("handles", &self.handle_count())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T, M: MemoryMapper> NodeAllocator<T> for PoolHandle<T, M> {
    fn allocate(&mut self, count: usize) -> AllocResult<NonNull<T>> {
        PoolHandle::allocate(self, count)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<T>, count: usize) -> AllocResult {
        unsafe { PoolHandle::deallocate(self, ptr, count) }
    }

    fn contains(&self, ptr: NonNull<T>) -> bool {
        PoolHandle::contains(self, ptr.as_ptr())
    }
}

impl<T, M: MemoryMapper> Rebind for PoolHandle<T, M> {
    type Rebound<U> = PoolHandle<U, M>;

    fn rebind<U>(&self) -> AllocResult<PoolHandle<U, M>> {
        PoolHandle::rebind(self)
    }
}
