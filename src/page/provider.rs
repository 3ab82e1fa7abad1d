//! Fixed-size page acquisition on top of a memory mapper.

use core::ptr::{self, NonNull};

use super::mapper::MemoryMapper;
use crate::AllocResult;

/// One mapped, zero-filled page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    base: NonNull<u8>,
    size: usize,
}

impl Page {
    /// Rebuild a page from a base address recorded by the page stack.
    pub(crate) fn from_addr(addr: usize, size: usize) -> Option<Self> {
        NonNull::new(addr as *mut u8).map(|base| Self { base, size })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `addr` lies in `[base, base + size)`.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.addr() && addr - self.addr() < self.size
    }
}

/// Hands out pages of one configured size.
pub struct PageProvider<M: MemoryMapper> {
    mapper: M,
    page_size: usize,
    live_pages: usize,
}

impl<M: MemoryMapper> PageProvider<M> {
    pub const fn new(mapper: M, page_size: usize) -> Self {
        Self {
            mapper,
            page_size,
            live_pages: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages acquired and not yet released.
    pub fn live_pages(&self) -> usize {
        self.live_pages
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Map one zero-filled page.
    pub fn acquire(&mut self) -> AllocResult<Page> {
        let base = self.mapper.map(self.page_size)?;
        if !M::ZEROED {
            unsafe { ptr::write_bytes(base.as_ptr(), 0, self.page_size) };
        }

        self.live_pages += 1;
        Ok(Page {
            base,
            size: self.page_size,
        })
    }

    /// Unmap a page.
    ///
    /// # Safety
    ///
    /// `page` must come from [`PageProvider::acquire`] on this provider, must
    /// not have been released already, and must not be accessed afterwards.
    pub unsafe fn release(&mut self, page: Page) {
        debug_assert_eq!(page.size, self.page_size);
        unsafe { self.mapper.unmap(page.base, page.size) };
        self.live_pages = self.live_pages.saturating_sub(1);
    }
}
