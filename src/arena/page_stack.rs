//! Page stack arena
//!
//! Tracks every object page the allocator has mapped together with the
//! number of object slots carved from it. The records themselves live in
//! page-sized blocks of a [`BlockArena`], so the allocator's own bookkeeping
//! is page-granular as well.

use super::block::BlockArena;
use crate::page::{MemoryMapper, Page, PageProvider};
use crate::AllocResult;

/// Metadata for one object page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct PageRecord {
    pub base: usize,
    pub carved: usize,
}

pub(crate) struct PageStack {
    arena: BlockArena<PageRecord>,
}

impl PageStack {
    pub const fn new(block_capacity: usize) -> Self {
        Self {
            arena: BlockArena::new(block_capacity),
        }
    }

    /// Returns a zeroed record for a new page, mapping another block if the
    /// newest one is full.
    pub fn next_page_slot<M: MemoryMapper>(
        &mut self,
        provider: &mut PageProvider<M>,
    ) -> AllocResult<&mut PageRecord> {
        let id = self.arena.push(provider, PageRecord::default())?;
        Ok(self.arena.get_mut(id))
    }

    /// Record of the page carved most recently.
    pub fn newest_mut(&mut self) -> Option<&mut PageRecord> {
        self.arena.last_mut()
    }

    /// Number of blocks in the stack.
    pub fn size(&self) -> usize {
        self.arena.block_count()
    }

    /// Number of object pages tracked.
    pub fn page_count(&self) -> usize {
        self.arena.len()
    }

    /// Object slots carved across every tracked page.
    pub fn total_carved(&self) -> usize {
        self.arena.iter().map(|record| record.carved).sum()
    }

    /// Whether `addr` falls inside any tracked page.
    pub fn contains(&self, addr: usize, page_size: usize) -> bool {
        self.arena.iter().any(|record| {
            record.base != 0 && addr >= record.base && addr - record.base < page_size
        })
    }

    /// Unmap every tracked page, then every block holding the records.
    /// Returns `(pages, blocks)` released.
    ///
    /// # Safety
    ///
    /// All pages and blocks must have been mapped by `provider`, and none of
    /// the object slots may be referenced afterwards.
    pub unsafe fn cleanup<M: MemoryMapper>(
        &mut self,
        provider: &mut PageProvider<M>,
    ) -> (usize, usize) {
        let page_size = provider.page_size();
        let mut pages = 0;
        for record in self.arena.iter() {
            if let Some(page) = Page::from_addr(record.base, page_size) {
                unsafe { provider.release(page) };
                pages += 1;
            }
        }

        let blocks = unsafe { self.arena.release(provider) };
        (pages, blocks)
    }

    /// Forget every record without unmapping.
    pub fn abandon(&mut self) {
        self.arena.abandon();
    }
}
