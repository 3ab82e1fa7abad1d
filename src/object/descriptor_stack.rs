//! Free and used lists
//!
//! Singly-linked stacks threaded through the `next` field of descriptors in
//! a [`DescriptorArena`]. A descriptor belongs to at most one stack at a time
//! and is moved between stacks, never copied.

use crate::arena::{DescriptorArena, DescriptorId};

pub(crate) struct DescriptorStack {
    top: Option<DescriptorId>,
    len: usize,
}

impl DescriptorStack {
    pub const fn new() -> Self {
        Self { top: None, len: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push(&mut self, arena: &mut DescriptorArena, id: DescriptorId) {
        arena.get_mut(id).next = self.top;
        self.top = Some(id);
        self.len += 1;
    }

    pub fn pop(&mut self, arena: &mut DescriptorArena) -> Option<DescriptorId> {
        let top = self.top?;
        self.top = arena.get_mut(top).next.take();
        self.len -= 1;
        Some(top)
    }

    /// Slot addresses from top to bottom.
    pub fn addresses<'a>(&self, arena: &'a DescriptorArena) -> impl Iterator<Item = usize> + 'a {
        let mut cursor = self.top;
        core::iter::from_fn(move || {
            let id = cursor?;
            let descriptor = arena.get(id);
            cursor = descriptor.next;
            Some(descriptor.slot_address)
        })
    }
}
