//! Page provider
//!
//! Pages are fixed-size, zero-filled regions obtained from a [`MemoryMapper`].
//! On unix the default mapper uses anonymous private `mmap` mappings.

pub mod mapper;
pub mod provider;

#[cfg(test)]
pub(crate) mod mock;

pub use mapper::MemoryMapper;
#[cfg(unix)]
pub use mapper::AnonymousMapper;
pub use provider::{Page, PageProvider};
