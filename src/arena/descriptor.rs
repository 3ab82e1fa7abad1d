//! Object descriptor arena
//!
//! Hands out never-before-used descriptor storage when a page is carved.
//! Descriptors are recycled between the free and used lists and are never
//! returned to this arena individually.

use super::block::{BlockArena, EntryId};
use crate::page::{MemoryMapper, PageProvider};
use crate::AllocResult;

pub(crate) type DescriptorId = EntryId;

/// One object-sized slot inside some page, linked into the free or used list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct ObjectDescriptor {
    pub slot_address: usize,
    pub next: Option<DescriptorId>,
}

pub(crate) struct DescriptorArena {
    arena: BlockArena<ObjectDescriptor>,
}

impl DescriptorArena {
    pub const fn new(block_capacity: usize) -> Self {
        Self {
            arena: BlockArena::new(block_capacity),
        }
    }

    /// Allocate an unlinked descriptor for `slot_address`.
    pub fn next_descriptor_slot<M: MemoryMapper>(
        &mut self,
        provider: &mut PageProvider<M>,
        slot_address: usize,
    ) -> AllocResult<DescriptorId> {
        self.arena.push(
            provider,
            ObjectDescriptor {
                slot_address,
                next: None,
            },
        )
    }

    pub fn get(&self, id: DescriptorId) -> &ObjectDescriptor {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: DescriptorId) -> &mut ObjectDescriptor {
        self.arena.get_mut(id)
    }

    /// Number of blocks in the arena.
    pub fn size(&self) -> usize {
        self.arena.block_count()
    }

    /// Number of descriptors ever handed out.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Unmap every block. Returns the number of blocks released.
    ///
    /// # Safety
    ///
    /// See [`BlockArena::release`].
    pub unsafe fn cleanup<M: MemoryMapper>(&mut self, provider: &mut PageProvider<M>) -> usize {
        unsafe { self.arena.release(provider) }
    }

    pub fn abandon(&mut self) {
        self.arena.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::mock::HeapMapper;

    #[test]
    fn test_descriptor_fits_block() {
        // A full default block of descriptors fits one 4 KiB page
        assert!(core::mem::size_of::<ObjectDescriptor>() * 255 <= 0x1000);
        assert_eq!(
            core::mem::size_of::<Option<DescriptorId>>(),
            core::mem::size_of::<u32>()
        );
    }

    #[test]
    fn test_next_descriptor_slot() {
        let mut provider = PageProvider::new(HeapMapper::new(), 0x1000);
        let mut arena = DescriptorArena::new(255);

        let mut ids = alloc::vec::Vec::new();
        for i in 0..600 {
            ids.push(arena.next_descriptor_slot(&mut provider, 0x1000 + i * 8).unwrap());
        }
        assert_eq!(arena.len(), 600);
        assert_eq!(arena.size(), 3);

        for (i, id) in ids.iter().enumerate() {
            let descriptor = arena.get(*id);
            assert_eq!(descriptor.slot_address, 0x1000 + i * 8);
            assert_eq!(descriptor.next, None);
        }

        assert_eq!(unsafe { arena.cleanup(&mut provider) }, 3);
        assert_eq!(provider.live_pages(), 0);
    }
}
