//! Allocator configuration.
//!
//! The page size and the number of entries held by one arena block are fixed
//! for the lifetime of an allocator. The defaults are 4 KiB pages and 255
//! entries per block, which keeps a full block of 16-byte entries inside a
//! single page.

#[cfg(feature = "log")]
use log::warn;

use crate::arena::{BlockArena, ObjectDescriptor, PageRecord};
use crate::{AllocError, AllocResult};

/// Default size of one page requested from the OS.
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Default number of entries stored in one arena block.
pub const DEFAULT_BLOCK_CAPACITY: usize = 255;

/// What to do when `deallocate` finds the used list empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderflowPolicy {
    /// Fail the call with [`AllocError::NotAllocated`].
    Reject,
    /// Synthesize a fresh descriptor, log a corruption warning and accept
    /// the freed address.
    Recover,
}

/// Allocator configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Size of one page requested from the OS. Must be a power of two.
    pub page_size: usize,
    /// Entries per arena block, for both page and object descriptors.
    pub block_capacity: usize,
    /// Used-list underflow handling.
    pub underflow: UnderflowPolicy,
}

impl AllocatorConfig {
    pub const fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            underflow: UnderflowPolicy::Reject,
        }
    }

    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub const fn with_block_capacity(mut self, block_capacity: usize) -> Self {
        self.block_capacity = block_capacity;
        self
    }

    pub const fn with_underflow_policy(mut self, underflow: UnderflowPolicy) -> Self {
        self.underflow = underflow;
        self
    }

    /// Check the page size and that one block of either arena fits in a page.
    pub fn validate(&self) -> AllocResult {
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            warn!("allocator config: page size {:#x} is not a power of two", self.page_size);
            return Err(AllocError::InvalidParam);
        }

        let max_capacity = BlockArena::<PageRecord>::max_capacity(self.page_size)
            .min(BlockArena::<ObjectDescriptor>::max_capacity(self.page_size));

        if self.block_capacity == 0 || self.block_capacity > max_capacity {
            warn!(
                "allocator config: block capacity {} outside 1..={} for page size {:#x}",
                self.block_capacity, max_capacity, self.page_size
            );
            return Err(AllocError::InvalidParam);
        }

        Ok(())
    }

    /// Number of object slots carved from one page for the given stride.
    pub const fn objects_per_page(&self, stride: usize) -> usize {
        if stride == 0 {
            0
        } else {
            self.page_size / stride
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
