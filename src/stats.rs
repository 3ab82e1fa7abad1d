//! Allocator statistics and teardown reports.

/// Point-in-time view of an allocator's bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Bytes reserved per object slot
    pub object_size: usize,
    pub objects_per_page: usize,
    /// Blocks in the page stack arena
    pub page_blocks: usize,
    /// Blocks in the object descriptor arena
    pub descriptor_blocks: usize,
    /// Object pages carved so far
    pub carved_pages: usize,
    /// Object slots carved across all pages
    pub total_carved: usize,
    pub free: usize,
    pub used: usize,
    /// Pages currently mapped, object pages and arena blocks alike
    pub mapped_pages: usize,
    #[cfg(feature = "tracking")]
    pub lifetime: LifetimeCounters,
}

impl AllocatorStats {
    /// Whether every carved slot is on exactly one of the two lists.
    pub fn is_conserved(&self) -> bool {
        self.free + self.used == self.total_carved
    }

    /// Share of carved slots currently handed out (0.0 when nothing is carved).
    pub fn utilization(&self) -> f64 {
        if self.total_carved == 0 {
            0.0
        } else {
            self.used as f64 / self.total_carved as f64
        }
    }
}

/// Counters accumulated over the lifetime of an allocator.
#[cfg(feature = "tracking")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LifetimeCounters {
    pub allocations: u64,
    pub deallocations: u64,
    pub peak_used: usize,
    pub underflow_recoveries: u64,
}

#[cfg(feature = "tracking")]
impl LifetimeCounters {
    pub const fn new() -> Self {
        Self {
            allocations: 0,
            deallocations: 0,
            peak_used: 0,
            underflow_recoveries: 0,
        }
    }

    pub(crate) fn record_allocation(&mut self, used: usize) {
        self.allocations += 1;
        if used > self.peak_used {
            self.peak_used = used;
        }
    }

    pub(crate) fn record_deallocation(&mut self) {
        self.deallocations += 1;
    }
}

/// Outcome of tearing an allocator down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Nothing was ever mapped.
    Empty,
    /// Every object page and arena block was unmapped.
    Released { pages: usize, blocks: usize },
    /// Objects were still outstanding, so every page was left mapped.
    Leaked { outstanding: usize, pages: usize },
}
