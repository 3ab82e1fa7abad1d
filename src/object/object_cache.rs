//! Object cache for a single object stride.
//!
//! The cache owns two descriptor stacks. `free` holds slots that can be
//! handed out and `used` holds one descriptor per outstanding object.
//! Allocation moves the top of `free` onto `used`; deallocation moves the top
//! of `used` back onto `free`, rewriting its slot address to the freed one.
//! The used list is therefore a count of outstanding objects, not an index
//! of them.
//!
//! When `free` runs dry the cache carves one whole page into
//! `page_size / stride` slots in a single batch. Pages are only returned to
//! the OS at teardown, and only when no object is outstanding.

use core::alloc::Layout;
use core::ptr::NonNull;

#[cfg(feature = "log")]
use log::{debug, error, warn};

use super::descriptor_stack::DescriptorStack;
use crate::arena::{DescriptorArena, PageStack};
use crate::config::{AllocatorConfig, UnderflowPolicy, DEFAULT_PAGE_SIZE};
use crate::page::{MemoryMapper, PageProvider};
#[cfg(feature = "tracking")]
use crate::stats::LifetimeCounters;
use crate::stats::{AllocatorStats, Teardown};
use crate::{align_up, is_aligned, AllocError, AllocResult};

/// Bytes reserved per slot for `layout`, padded so that every slot keeps the
/// layout's alignment. Zero-sized types still get a distinct address per slot.
fn stride_for(layout: Layout) -> usize {
    layout.pad_to_align().size().max(layout.align())
}

/// Untyped single-object slab cache.
pub struct ObjectCache<M: MemoryMapper> {
    provider: PageProvider<M>,
    pages: PageStack,
    descriptors: DescriptorArena,
    free: DescriptorStack,
    used: DescriptorStack,
    config: AllocatorConfig,
    stride: usize,
    align: usize,
    #[cfg(feature = "tracking")]
    counters: LifetimeCounters,
}

impl<M: MemoryMapper> ObjectCache<M> {
    /// Create an empty cache for objects of `layout`. Nothing is mapped
    /// until the first allocation.
    pub fn new(mapper: M, config: AllocatorConfig, layout: Layout) -> AllocResult<Self> {
        config.validate()?;

        let stride = stride_for(layout);
        if stride > config.page_size || layout.align() > config.page_size.min(DEFAULT_PAGE_SIZE) {
            error!(
                "object cache: object of {} bytes (align {}) does not fit a {:#x} byte page",
                layout.size(),
                layout.align(),
                config.page_size
            );
            return Err(AllocError::ObjectTooLarge);
        }

        Ok(Self {
            provider: PageProvider::new(mapper, config.page_size),
            pages: PageStack::new(config.block_capacity),
            descriptors: DescriptorArena::new(config.block_capacity),
            free: DescriptorStack::new(),
            used: DescriptorStack::new(),
            config,
            stride,
            align: layout.align(),
            #[cfg(feature = "tracking")]
            counters: LifetimeCounters::new(),
        })
    }

    /// Hand out one slot.
    pub fn allocate_one(&mut self) -> AllocResult<NonNull<u8>> {
        if self.free.is_empty() {
            self.replenish()?;
        }

        let id = self
            .free
            .pop(&mut self.descriptors)
            .ok_or(AllocError::NoMemory)?;
        self.used.push(&mut self.descriptors, id);

        #[cfg(feature = "tracking")]
        self.counters.record_allocation(self.used.len());

        let addr = self.descriptors.get(id).slot_address;
        NonNull::new(addr as *mut u8).ok_or(AllocError::NoMemory)
    }

    /// Return one slot.
    ///
    /// The address is not validated against the cache in release builds; it
    /// must come from [`ObjectCache::allocate_one`] on this cache.
    pub fn deallocate_one(&mut self, ptr: NonNull<u8>) -> AllocResult {
        let addr = ptr.as_ptr() as usize;
        debug_assert!(
            self.contains(addr),
            "object cache: {:#x} is not owned by this cache",
            addr
        );

        let id = match self.used.pop(&mut self.descriptors) {
            Some(id) => id,
            None => match self.config.underflow {
                UnderflowPolicy::Reject => {
                    error!(
                        "object cache: deallocate of {:#x} with no outstanding objects",
                        addr
                    );
                    return Err(AllocError::NotAllocated);
                }
                UnderflowPolicy::Recover => {
                    warn!(
                        "object cache: used list empty on deallocate of {:#x}, memory corruption likely",
                        addr
                    );
                    #[cfg(feature = "tracking")]
                    {
                        self.counters.underflow_recoveries += 1;
                    }
                    self.descriptors
                        .next_descriptor_slot(&mut self.provider, addr)?
                }
            },
        };

        self.descriptors.get_mut(id).slot_address = addr;
        self.free.push(&mut self.descriptors, id);

        #[cfg(feature = "tracking")]
        self.counters.record_deallocation();

        Ok(())
    }

    /// Carve one fresh page into free slots.
    ///
    /// If the descriptor arena cannot grow part way through, the slots
    /// carved so far stay on the free list and the call still succeeds.
    pub fn replenish(&mut self) -> AllocResult {
        let page = self.provider.acquire()?;
        match self.pages.next_page_slot(&mut self.provider) {
            Ok(record) => record.base = page.addr(),
            Err(e) => {
                unsafe { self.provider.release(page) };
                return Err(e);
            }
        }

        let slots = self.objects_per_page();
        let mut carved = 0;
        let mut failure = None;
        for index in 0..slots {
            let slot_address = page.addr() + index * self.stride;
            match self
                .descriptors
                .next_descriptor_slot(&mut self.provider, slot_address)
            {
                Ok(id) => {
                    self.free.push(&mut self.descriptors, id);
                    carved += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(record) = self.pages.newest_mut() {
            record.carved = carved;
        }

        match failure {
            Some(e) if carved == 0 => Err(e),
            Some(e) => {
                warn!(
                    "object cache: page {:#x} only partially carved ({} of {} slots): {}",
                    page.addr(),
                    carved,
                    slots,
                    e
                );
                Ok(())
            }
            None => {
                debug!(
                    "object cache: carved page {:#x} into {} slots of {} bytes",
                    page.addr(),
                    carved,
                    self.stride
                );
                Ok(())
            }
        }
    }

    /// Whether `addr` lies inside a page owned by this cache.
    pub fn contains(&self, addr: usize) -> bool {
        self.pages.contains(addr, self.config.page_size)
    }

    /// Whether objects of `layout` can be served from the current slots.
    pub fn fits(&self, layout: Layout) -> bool {
        layout.size() <= self.stride && is_aligned(self.stride, layout.align())
    }

    /// Widen the slot stride so that it also serves `layout`.
    ///
    /// Only possible before the first page is carved.
    pub fn accommodate(&mut self, layout: Layout) -> AllocResult {
        if self.fits(layout) {
            return Ok(());
        }
        if self.pages.page_count() != 0 {
            error!(
                "object cache: cannot widen {} byte slots to {} bytes after pages were carved",
                self.stride,
                layout.size()
            );
            return Err(AllocError::InvalidParam);
        }

        let align = self.align.max(layout.align());
        let stride = align_up(self.stride.max(stride_for(layout)), align);
        if stride > self.config.page_size || align > self.config.page_size.min(DEFAULT_PAGE_SIZE) {
            return Err(AllocError::ObjectTooLarge);
        }

        self.stride = stride;
        self.align = align;
        Ok(())
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn mapper(&self) -> &M {
        self.provider.mapper()
    }

    /// Bytes reserved per slot.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn objects_per_page(&self) -> usize {
        self.config.objects_per_page(self.stride)
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// Blocks in the page stack arena.
    pub fn page_stack_size(&self) -> usize {
        self.pages.size()
    }

    /// Blocks in the object descriptor arena.
    pub fn descriptor_stack_size(&self) -> usize {
        self.descriptors.size()
    }

    pub fn carved_pages(&self) -> usize {
        self.pages.page_count()
    }

    pub fn total_carved(&self) -> usize {
        self.pages.total_carved()
    }

    /// Slot addresses currently on the free list, most recently freed first.
    pub fn free_addresses(&self) -> impl Iterator<Item = usize> + '_ {
        self.free.addresses(&self.descriptors)
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            object_size: self.stride,
            objects_per_page: self.objects_per_page(),
            page_blocks: self.pages.size(),
            descriptor_blocks: self.descriptors.size(),
            carved_pages: self.pages.page_count(),
            total_carved: self.pages.total_carved(),
            free: self.free.len(),
            used: self.used.len(),
            mapped_pages: self.provider.live_pages(),
            #[cfg(feature = "tracking")]
            lifetime: self.counters,
        }
    }

    /// Move everything this cache owns into the returned cache, leaving
    /// `self` empty with the same configuration.
    pub fn take(&mut self) -> Self
    where
        M: Clone,
    {
        let empty = Self {
            provider: PageProvider::new(self.provider.mapper().clone(), self.config.page_size),
            pages: PageStack::new(self.config.block_capacity),
            descriptors: DescriptorArena::new(self.config.block_capacity),
            free: DescriptorStack::new(),
            used: DescriptorStack::new(),
            config: self.config,
            stride: self.stride,
            align: self.align,
            #[cfg(feature = "tracking")]
            counters: LifetimeCounters::new(),
        };
        core::mem::replace(self, empty)
    }

    /// Unmap every page and arena block, unless objects are outstanding.
    ///
    /// With outstanding objects nothing is unmapped: the containers holding
    /// them may still dereference the slots. The cache forgets its pages
    /// instead, so later teardowns are no-ops.
    pub fn teardown(&mut self) -> Teardown {
        let outstanding = self.used.len();
        if outstanding > 0 {
            let pages = self.pages.page_count();
            error!(
                "object allocator leaked memory: {} objects outstanding, leaving {} pages mapped",
                outstanding, pages
            );
            self.pages.abandon();
            self.descriptors.abandon();
            self.free = DescriptorStack::new();
            self.used = DescriptorStack::new();
            return Teardown::Leaked { outstanding, pages };
        }

        if self.pages.size() == 0 && self.descriptors.size() == 0 {
            return Teardown::Empty;
        }

        let (pages, page_blocks) = unsafe { self.pages.cleanup(&mut self.provider) };
        let descriptor_blocks = unsafe { self.descriptors.cleanup(&mut self.provider) };
        self.free = DescriptorStack::new();
        self.used = DescriptorStack::new();

        debug!(
            "object cache: released {} pages and {} arena blocks",
            pages,
            page_blocks + descriptor_blocks
        );
        Teardown::Released {
            pages,
            blocks: page_blocks + descriptor_blocks,
        }
    }
}

impl<M: MemoryMapper> Drop for ObjectCache<M> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::mock::HeapMapper;
    use alloc::collections::BTreeSet;
    use alloc::vec::Vec;

    fn cache_for(size: usize, mapper: HeapMapper) -> ObjectCache<HeapMapper> {
        let layout = Layout::from_size_align(size, size.min(8)).unwrap();
        ObjectCache::new(mapper, AllocatorConfig::new(), layout).unwrap()
    }

    #[test]
    fn test_single_allocation() {
        let mut cache = cache_for(8, HeapMapper::new());

        let ptr = cache.allocate_one().unwrap();
        assert!(cache.contains(ptr.as_ptr() as usize));
        assert_eq!(cache.used_count(), 1);
        assert_eq!(cache.free_count(), 4096 / 8 - 1);
        assert_eq!(cache.carved_pages(), 1);
        assert_eq!(cache.page_stack_size(), 1);
        assert_eq!(cache.descriptor_stack_size(), 3);

        cache.deallocate_one(ptr).unwrap();
        assert_eq!(cache.used_count(), 0);
        assert_eq!(cache.free_count(), 4096 / 8);
    }

    #[test]
    fn test_second_page_after_exhaustion() {
        let mut cache = cache_for(64, HeapMapper::new());
        let per_page = cache.objects_per_page();
        assert_eq!(per_page, 64);

        let mut ptrs = Vec::new();
        for _ in 0..per_page {
            ptrs.push(cache.allocate_one().unwrap());
        }
        assert_eq!(cache.carved_pages(), 1);
        assert_eq!(cache.free_count(), 0);

        ptrs.push(cache.allocate_one().unwrap());
        assert_eq!(cache.carved_pages(), 2);
        assert_eq!(cache.total_carved(), 2 * per_page);

        for ptr in ptrs {
            cache.deallocate_one(ptr).unwrap();
        }
        assert_eq!(cache.used_count(), 0);
    }

    #[test]
    fn test_slots_are_distinct_and_aligned() {
        let mut cache = cache_for(24, HeapMapper::new());
        let mut seen = BTreeSet::new();
        for _ in 0..1000 {
            let addr = cache.allocate_one().unwrap().as_ptr() as usize;
            assert_eq!(addr % 8, 0);
            assert!(seen.insert(addr));
        }
        // 170 slots per page for a 24-byte stride
        assert_eq!(cache.carved_pages(), 6);

        for addr in seen {
            cache
                .deallocate_one(NonNull::new(addr as *mut u8).unwrap())
                .unwrap();
        }
    }

    #[test]
    fn test_lifo_reuse() {
        let mut cache = cache_for(16, HeapMapper::new());
        let a = cache.allocate_one().unwrap();
        let _b = cache.allocate_one().unwrap();

        cache.deallocate_one(a).unwrap();
        assert_eq!(cache.free_addresses().next(), Some(a.as_ptr() as usize));
        assert_eq!(cache.allocate_one().unwrap(), a);

        // Leave _b outstanding; teardown must not unmap
        assert!(matches!(cache.teardown(), Teardown::Leaked { outstanding: 2, .. }));
    }

    #[test]
    fn test_underflow_rejected() {
        let mut cache = cache_for(8, HeapMapper::new());
        let ptr = cache.allocate_one().unwrap();
        cache.deallocate_one(ptr).unwrap();

        assert_eq!(cache.deallocate_one(ptr), Err(AllocError::NotAllocated));
        assert_eq!(cache.used_count(), 0);
        assert_eq!(cache.free_count(), 512);
        assert!(cache.stats().is_conserved());
    }

    #[test]
    fn test_underflow_recovered() {
        let layout = Layout::new::<u64>();
        let config = AllocatorConfig::new().with_underflow_policy(UnderflowPolicy::Recover);
        let mut cache = ObjectCache::new(HeapMapper::new(), config, layout).unwrap();

        let ptr = cache.allocate_one().unwrap();
        cache.deallocate_one(ptr).unwrap();
        assert_eq!(cache.deallocate_one(ptr), Ok(()));

        // The phantom descriptor shows up as an extra free slot
        assert_eq!(cache.used_count(), 0);
        assert_eq!(cache.free_count(), 513);
        assert!(!cache.stats().is_conserved());

        #[cfg(feature = "tracking")]
        assert_eq!(cache.stats().lifetime.underflow_recoveries, 1);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mapper = HeapMapper::new();
        let mut cache = cache_for(8, mapper.clone());

        let ptrs: Vec<_> = (0..600).map(|_| cache.allocate_one().unwrap()).collect();
        for ptr in ptrs {
            cache.deallocate_one(ptr).unwrap();
        }

        // 2 object pages, 1 page-stack block, 5 descriptor blocks
        assert_eq!(mapper.live(), 8);
        assert_eq!(
            cache.teardown(),
            Teardown::Released {
                pages: 2,
                blocks: 6
            }
        );
        assert_eq!(mapper.live(), 0);
        assert_eq!(cache.teardown(), Teardown::Empty);
    }

    #[test]
    fn test_drop_with_outstanding_objects_keeps_pages() {
        let mapper = HeapMapper::new();
        {
            let mut cache = cache_for(8, mapper.clone());
            let ptr = cache.allocate_one().unwrap();
            unsafe { ptr.as_ptr().cast::<u64>().write(0xdead_beef) };
        }
        // Object page, page-stack block, three descriptor blocks
        assert_eq!(mapper.live(), 5);
        assert_eq!(mapper.ledger.borrow().unmaps, 0);
    }

    #[test]
    fn test_object_too_large() {
        let layout = Layout::from_size_align(4097, 8).unwrap();
        let result = ObjectCache::new(HeapMapper::new(), AllocatorConfig::new(), layout);
        assert!(matches!(result, Err(AllocError::ObjectTooLarge)));

        let layout = Layout::from_size_align(4096, 8).unwrap();
        let mut cache = ObjectCache::new(HeapMapper::new(), AllocatorConfig::new(), layout).unwrap();
        assert_eq!(cache.objects_per_page(), 1);
        let ptr = cache.allocate_one().unwrap();
        cache.deallocate_one(ptr).unwrap();
    }

    #[test]
    fn test_unpadded_layout_keeps_alignment() {
        let layout = Layout::from_size_align(12, 8).unwrap();
        let mut cache = ObjectCache::new(HeapMapper::new(), AllocatorConfig::new(), layout).unwrap();
        assert_eq!(cache.stride(), 16);
        assert_eq!(cache.objects_per_page(), 256);

        let a = cache.allocate_one().unwrap();
        let b = cache.allocate_one().unwrap();
        assert_eq!(a.as_ptr() as usize % 8, 0);
        assert_eq!(b.as_ptr() as usize % 8, 0);

        cache.deallocate_one(b).unwrap();
        cache.deallocate_one(a).unwrap();
    }

    #[cfg(feature = "tracking")]
    #[test]
    fn test_lifetime_counters_follow_traffic() {
        let mut cache = cache_for(8, HeapMapper::new());

        let a = cache.allocate_one().unwrap();
        let b = cache.allocate_one().unwrap();
        let c = cache.allocate_one().unwrap();
        cache.deallocate_one(c).unwrap();
        cache.deallocate_one(b).unwrap();
        let d = cache.allocate_one().unwrap();
        cache.deallocate_one(d).unwrap();
        cache.deallocate_one(a).unwrap();

        // Rejected underflow is not a deallocation
        assert_eq!(cache.deallocate_one(a), Err(AllocError::NotAllocated));

        let lifetime = cache.stats().lifetime;
        assert_eq!(lifetime.allocations, 4);
        assert_eq!(lifetime.deallocations, 4);
        assert_eq!(lifetime.peak_used, 3);
        assert_eq!(lifetime.underflow_recoveries, 0);
    }

    #[test]
    fn test_zero_sized_objects_get_distinct_slots() {
        let mut cache =
            ObjectCache::new(HeapMapper::new(), AllocatorConfig::new(), Layout::new::<()>()).unwrap();
        assert_eq!(cache.stride(), 1);
        let a = cache.allocate_one().unwrap();
        let b = cache.allocate_one().unwrap();
        assert_ne!(a, b);
        cache.deallocate_one(b).unwrap();
        cache.deallocate_one(a).unwrap();
    }

    #[test]
    fn test_out_of_memory_on_first_page() {
        let mut cache = cache_for(8, HeapMapper::failing_after(0));
        assert_eq!(cache.allocate_one(), Err(AllocError::NoMemory));
        assert_eq!(cache.used_count(), 0);
        assert_eq!(cache.teardown(), Teardown::Empty);
    }

    #[test]
    fn test_partial_carve_keeps_slots() {
        // Object page, page-stack block and one descriptor block succeed
        let mapper = HeapMapper::failing_after(3);
        let mut cache = cache_for(8, mapper.clone());

        let ptr = cache.allocate_one().unwrap();
        assert_eq!(cache.total_carved(), 255);
        assert_eq!(cache.free_count(), 254);
        assert!(cache.stats().is_conserved());

        cache.deallocate_one(ptr).unwrap();
        drop(cache);
        assert_eq!(mapper.live(), 0);
    }

    #[test]
    fn test_page_stack_block_failure_returns_page() {
        // The object page maps, the first page-stack block does not
        let mapper = HeapMapper::failing_after(1);
        let mut cache = cache_for(8, mapper.clone());

        assert_eq!(cache.replenish(), Err(AllocError::NoMemory));
        assert_eq!(mapper.live(), 0);
        assert_eq!(cache.carved_pages(), 0);
    }

    #[test]
    fn test_accommodate() {
        let mut cache = cache_for(8, HeapMapper::new());
        assert!(cache.fits(Layout::new::<u32>()));
        assert!(!cache.fits(Layout::new::<[u64; 2]>()));

        cache.accommodate(Layout::new::<[u64; 2]>()).unwrap();
        assert_eq!(cache.stride(), 16);

        cache.accommodate(Layout::from_size_align(12, 4).unwrap()).unwrap();
        assert_eq!(cache.stride(), 16);

        let ptr = cache.allocate_one().unwrap();
        assert_eq!(
            cache.accommodate(Layout::new::<[u64; 4]>()),
            Err(AllocError::InvalidParam)
        );
        cache.deallocate_one(ptr).unwrap();
    }

    #[test]
    fn test_take_moves_ownership() {
        let mapper = HeapMapper::new();
        let mut cache = cache_for(8, mapper.clone());
        let ptr = cache.allocate_one().unwrap();

        let mut moved = cache.take();
        assert_eq!(cache.used_count(), 0);
        assert_eq!(cache.carved_pages(), 0);
        assert_eq!(cache.teardown(), Teardown::Empty);

        assert_eq!(moved.used_count(), 1);
        assert!(moved.contains(ptr.as_ptr() as usize));
        moved.deallocate_one(ptr).unwrap();
        drop(moved);
        assert_eq!(mapper.live(), 0);
    }
}
