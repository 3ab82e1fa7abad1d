//! Single-object slab machinery.

mod descriptor_stack;
mod object_cache;

pub use object_cache::ObjectCache;
