//! Heap-backed mapper for unit tests.

use alloc::rc::Rc;
use core::alloc::Layout;
use core::cell::RefCell;
use core::ptr::NonNull;

use super::mapper::MemoryMapper;
use crate::{AllocError, AllocResult};

#[derive(Debug, Default)]
pub(crate) struct MapLedger {
    pub maps: usize,
    pub unmaps: usize,
    pub fail_after: Option<usize>,
}

/// Maps pages out of the global heap and records every call in a ledger
/// shared between clones, so tests can inspect it after the owner is gone.
#[derive(Debug, Default, Clone)]
pub(crate) struct HeapMapper {
    pub ledger: Rc<RefCell<MapLedger>>,
}

impl HeapMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every map request after the first `maps` succeed.
    pub fn failing_after(maps: usize) -> Self {
        let mapper = Self::default();
        mapper.ledger.borrow_mut().fail_after = Some(maps);
        mapper
    }

    pub fn live(&self) -> usize {
        let ledger = self.ledger.borrow();
        ledger.maps - ledger.unmaps
    }

    fn layout(size: usize) -> AllocResult<Layout> {
        Layout::from_size_align(size, size.min(0x1000)).map_err(|_| AllocError::InvalidParam)
    }
}

impl MemoryMapper for HeapMapper {
    fn map(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let mut ledger = self.ledger.borrow_mut();
        if let Some(limit) = ledger.fail_after {
            if ledger.maps >= limit {
                return Err(AllocError::NoMemory);
            }
        }

        let ptr = unsafe { alloc::alloc::alloc(Self::layout(size)?) };
        let ptr = NonNull::new(ptr).ok_or(AllocError::NoMemory)?;
        // Scribble so that missing zero-fill shows up in tests
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0xcc, size) };
        ledger.maps += 1;
        Ok(ptr)
    }

    unsafe fn unmap(&mut self, addr: NonNull<u8>, size: usize) {
        let layout = Self::layout(size).expect("size was accepted by map");
        unsafe { alloc::alloc::dealloc(addr.as_ptr(), layout) };
        self.ledger.borrow_mut().unmaps += 1;
    }
}
