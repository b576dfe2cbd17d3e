/// Snapshot of allocator bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Aligned heap offset where the usable region begins.
    pub base_offset: u32,
    /// Bytes the allocator may hand out, prefixes included.
    pub usable_size: u32,
    /// High-water mark of bump allocation.
    pub bumper: u32,
    /// Live payload plus prefix bytes.
    pub bytes_in_use: u32,
    /// Largest `bytes_in_use` seen since construction or reset.
    pub peak_bytes_in_use: u32,
    pub live_allocations: u32,
    pub total_allocations: u64,
    pub total_deallocations: u64,
    /// Allocations served from a free list rather than the bumper.
    pub free_list_hits: u64,
}

impl AllocatorStats {
    /// Fraction of the usable region currently in use (0-1).
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.usable_size == 0 {
            0.0
        } else {
            f64::from(self.bytes_in_use) / f64::from(self.usable_size)
        }
    }

    /// Bumped bytes that currently sit on free lists.
    #[must_use]
    pub const fn free_list_bytes(&self) -> u32 {
        self.bumper.saturating_sub(self.bytes_in_use)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization() {
        let stats = AllocatorStats {
            usable_size: 1024,
            bytes_in_use: 256,
            bumper: 512,
            ..AllocatorStats::default()
        };
        assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats.free_list_bytes(), 256);
        assert!(AllocatorStats::default().utilization().abs() < f64::EPSILON);
    }
}
