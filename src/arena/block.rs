//! Page-backed arena of fixed-capacity blocks.
//!
//! Every block is one page taken from the [`PageProvider`] and holds up to
//! `capacity` entries laid out back to back from the start of the page. The
//! arena only ever appends: an entry never moves once written, so it can be
//! addressed by a packed `(block, slot)` [`EntryId`] for the whole lifetime
//! of the arena. A new block is mapped only when the newest one is full.

use alloc::vec::Vec;
use core::marker::PhantomData;
use core::mem::size_of;
use core::num::NonZeroU32;

#[cfg(feature = "log")]
use log::debug;

use crate::page::{MemoryMapper, Page, PageProvider};
use crate::{AllocError, AllocResult};

/// Packed `(block, slot)` address of an arena entry.
///
/// Stored as `block * capacity + slot + 1` so that `Option<EntryId>` stays
/// four bytes wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(NonZeroU32);

impl EntryId {
    fn new(block: usize, slot: usize, capacity: usize) -> Option<Self> {
        let raw = block
            .checked_mul(capacity)?
            .checked_add(slot)?
            .checked_add(1)?;
        u32::try_from(raw).ok().and_then(NonZeroU32::new).map(Self)
    }

    fn split(self, capacity: usize) -> (usize, usize) {
        let index = self.0.get() as usize - 1;
        (index / capacity, index % capacity)
    }
}

pub(crate) struct BlockArena<E: Copy> {
    /// Pages backing each block, oldest first
    blocks: Vec<Page>,
    /// Populated entries in the newest block
    head_len: usize,
    capacity: usize,
    _marker: PhantomData<E>,
}

impl<E: Copy> BlockArena<E> {
    pub const fn new(capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            head_len: 0,
            capacity,
            _marker: PhantomData,
        }
    }

    /// Largest number of entries one block can hold in a page of `page_size`.
    pub const fn max_capacity(page_size: usize) -> usize {
        page_size / size_of::<E>()
    }

    /// Number of blocks mapped so far.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of entries handed out so far.
    pub fn len(&self) -> usize {
        match self.blocks.len() {
            0 => 0,
            n => (n - 1) * self.capacity + self.head_len,
        }
    }

    /// Write `entry` into the next free slot, mapping a new block first if
    /// the newest one is full.
    pub fn push<M: MemoryMapper>(
        &mut self,
        provider: &mut PageProvider<M>,
        entry: E,
    ) -> AllocResult<EntryId> {
        let needs_block = self.blocks.is_empty() || self.head_len == self.capacity;
        let (block, slot) = if needs_block {
            (self.blocks.len(), 0)
        } else {
            (self.blocks.len() - 1, self.head_len)
        };

        let id = EntryId::new(block, slot, self.capacity).ok_or(AllocError::NoMemory)?;
        if needs_block {
            self.grow(provider)?;
        }

        unsafe { self.entry_ptr(block, slot).write(entry) };
        self.head_len += 1;
        Ok(id)
    }

    fn grow<M: MemoryMapper>(&mut self, provider: &mut PageProvider<M>) -> AllocResult {
        debug_assert!(self.capacity * size_of::<E>() <= provider.page_size());
        self.blocks
            .try_reserve(1)
            .map_err(|_| AllocError::NoMemory)?;

        let page = provider.acquire()?;
        self.blocks.push(page);
        self.head_len = 0;

        debug!(
            "block arena: mapped block {} at {:#x}",
            self.blocks.len(),
            page.addr()
        );
        Ok(())
    }

    fn entry_ptr(&self, block: usize, slot: usize) -> *mut E {
        debug_assert!(slot < self.capacity);
        (self.blocks[block].addr() + slot * size_of::<E>()) as *mut E
    }

    pub fn get(&self, id: EntryId) -> &E {
        let (block, slot) = id.split(self.capacity);
        unsafe { &*self.entry_ptr(block, slot) }
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut E {
        let (block, slot) = id.split(self.capacity);
        unsafe { &mut *self.entry_ptr(block, slot) }
    }

    /// The most recently written entry.
    pub fn last_mut(&mut self) -> Option<&mut E> {
        if self.blocks.is_empty() || self.head_len == 0 {
            return None;
        }
        let ptr = self.entry_ptr(self.blocks.len() - 1, self.head_len - 1);
        Some(unsafe { &mut *ptr })
    }

    /// Every entry written so far, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        let last = self.blocks.len().saturating_sub(1);
        (0..self.blocks.len()).flat_map(move |block| {
            let populated = if block == last {
                self.head_len
            } else {
                self.capacity
            };
            (0..populated).map(move |slot| unsafe { &*self.entry_ptr(block, slot) })
        })
    }

    /// Unmap every block. Returns the number of blocks released.
    ///
    /// # Safety
    ///
    /// Every block must have been mapped by `provider`, and no reference or
    /// id into the arena may be used afterwards.
    pub unsafe fn release<M: MemoryMapper>(&mut self, provider: &mut PageProvider<M>) -> usize {
        let count = self.blocks.len();
        for page in self.blocks.drain(..) {
            unsafe { provider.release(page) };
        }
        self.head_len = 0;
        count
    }

    /// Drop all bookkeeping without unmapping anything.
    pub fn abandon(&mut self) {
        self.blocks = Vec::new();
        self.head_len = 0;
    }
}
