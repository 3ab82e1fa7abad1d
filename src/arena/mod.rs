//! Page-backed bookkeeping arenas.
//!
//! Both the page stack and the descriptor arena grow one page-sized block at
//! a time and never move an entry once it has been written.

pub(crate) mod block;
pub(crate) mod descriptor;
pub(crate) mod page_stack;

pub(crate) use block::BlockArena;
pub(crate) use descriptor::{DescriptorArena, DescriptorId, ObjectDescriptor};
pub(crate) use page_stack::{PageRecord, PageStack};
