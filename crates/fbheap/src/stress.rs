//! Randomized allocate/deallocate churn.
//!
//! Every block is filled with a pattern derived from a per-block tag and
//! checked again right before it is freed, so overlapping blocks or header
//! writes into a payload show up as [`Error::Invariant`].

use std::time::Instant;

use fbheap_alloc::{
    AllocatorStats, FreeingBumpAllocator, HeapError, HeapPtr, LinearMemory,
    MAX_POSSIBLE_ALLOCATION, SizeClass,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metrics;

/// Probability that an operation frees a live block instead of allocating.
const FREE_PROBABILITY: f64 = 0.45;

/// Stress run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressConfig {
    /// Number of random operations before the final cleanup.
    pub ops: u64,
    pub seed: u64,
    /// Largest request size, inclusive.
    pub max_size: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            ops: 100_000,
            seed: 0,
            max_size: 4096,
        }
    }
}

/// Stress run results.
#[derive(Debug, Clone, PartialEq)]
pub struct StressReport {
    pub ops: u64,
    pub allocations: u64,
    pub deallocations: u64,
    /// Allocations rejected with `OutOfMemory`.
    pub out_of_memory: u64,
    /// Most blocks live at once.
    pub peak_live: usize,
    pub time_secs: f64,
    /// Allocator state after the run, with every block freed.
    pub stats: AllocatorStats,
}

impl StressReport {
    #[must_use]
    pub const fn ops_per_sec(&self) -> f64 {
        if self.time_secs > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let ops = self.ops as f64;
            ops / self.time_secs
        } else {
            0.0
        }
    }

    pub fn print_json(&self) {
        println!(
            r#"{{"ops":{},"allocations":{},"deallocations":{},"out_of_memory":{},"peak_live":{},"time":{:.6},"peak_bytes_in_use":{},"bumper":{},"free_list_hits":{}}}"#,
            self.ops,
            self.allocations,
            self.deallocations,
            self.out_of_memory,
            self.peak_live,
            self.time_secs,
            self.stats.peak_bytes_in_use,
            self.stats.bumper,
            self.stats.free_list_hits,
        );
    }
}

struct LiveBlock {
    ptr: HeapPtr,
    size: u32,
    tag: u8,
}

fn pattern(tag: u8, size: u32) -> Vec<u8> {
    (0..=u8::MAX)
        .cycle()
        .take(size as usize)
        .map(|b| b ^ tag)
        .collect()
}

struct Churn<'a, M: LinearMemory> {
    heap: &'a mut FreeingBumpAllocator<M>,
    live: Vec<LiveBlock>,
    /// Sum of slot sizes over `live`; must always equal `bytes_in_use`.
    expected_in_use: u32,
}

impl<M: LinearMemory> Churn<'_, M> {
    fn allocate(&mut self, size: u32, tag: u8) -> Result<bool> {
        let class = SizeClass::for_size(size)?;
        let ptr = match self.heap.allocate(size) {
            Ok(ptr) => ptr,
            Err(e @ HeapError::OutOfMemory { .. }) => {
                metrics::record_failure(&e);
                return Ok(false);
            }
            Err(e) => {
                metrics::record_failure(&e);
                return Err(e.into());
            }
        };
        metrics::record_allocation(size, class);

        self.heap.write(ptr, &pattern(tag, size))?;
        self.live.push(LiveBlock { ptr, size, tag });
        self.expected_in_use += class.slot_size();
        Ok(true)
    }

    fn free(&mut self, index: usize) -> Result<()> {
        let block = self.live.swap_remove(index);
        let actual = self.heap.read(block.ptr, block.size)?;
        if actual != pattern(block.tag, block.size).as_slice() {
            return Err(Error::Invariant(format!(
                "payload of block {} ({} bytes) was overwritten",
                block.ptr, block.size
            )));
        }
        self.heap.deallocate(block.ptr)?;
        metrics::record_deallocation();
        self.expected_in_use -= SizeClass::for_size(block.size)?.slot_size();
        Ok(())
    }

    fn check(&self) -> Result<()> {
        let in_use = self.heap.bytes_in_use();
        if in_use != self.expected_in_use {
            return Err(Error::Invariant(format!(
                "bytes_in_use is {in_use}, live blocks account for {}",
                self.expected_in_use
            )));
        }
        if in_use > self.heap.usable_size() {
            return Err(Error::Invariant(format!(
                "bytes_in_use {in_use} exceeds usable size {}",
                self.heap.usable_size()
            )));
        }
        Ok(())
    }
}

/// Run `config.ops` random operations against `heap`, then free everything.
///
/// `on_progress` is called after each operation with the number completed.
///
/// # Errors
///
/// - [`Error::Config`] if `max_size` exceeds the largest allocation.
/// - [`Error::Invariant`] if a payload or the usage counter is wrong.
/// - [`Error::Heap`] for any heap error other than running out of memory.
pub fn run_stress<M: LinearMemory>(
    heap: &mut FreeingBumpAllocator<M>,
    config: &StressConfig,
    mut on_progress: impl FnMut(u64),
) -> Result<StressReport> {
    if config.max_size > MAX_POSSIBLE_ALLOCATION {
        return Err(Error::Config(format!(
            "max size {} exceeds the {MAX_POSSIBLE_ALLOCATION} byte limit",
            config.max_size
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut churn = Churn {
        expected_in_use: heap.bytes_in_use(),
        heap,
        live: Vec::new(),
    };
    let mut report = StressReport {
        ops: config.ops,
        allocations: 0,
        deallocations: 0,
        out_of_memory: 0,
        peak_live: 0,
        time_secs: 0.0,
        stats: AllocatorStats::default(),
    };

    info!(
        ops = config.ops,
        seed = config.seed,
        max_size = config.max_size,
        "stress run started"
    );
    let start = Instant::now();

    for done in 1..=config.ops {
        if !churn.live.is_empty() && rng.gen_bool(FREE_PROBABILITY) {
            let index = rng.gen_range(0..churn.live.len());
            churn.free(index)?;
            report.deallocations += 1;
        } else {
            let size = rng.gen_range(0..=config.max_size);
            let tag = rng.gen_range(0..=u8::MAX);
            if churn.allocate(size, tag)? {
                report.allocations += 1;
            } else {
                report.out_of_memory += 1;
            }
        }
        churn.check()?;
        report.peak_live = report.peak_live.max(churn.live.len());
        on_progress(done);
    }

    debug!(live = churn.live.len(), "freeing remaining blocks");
    while !churn.live.is_empty() {
        churn.free(churn.live.len() - 1)?;
        report.deallocations += 1;
    }
    churn.check()?;

    report.time_secs = start.elapsed().as_secs_f64();
    report.stats = churn.heap.stats();
    metrics::record_stats(&report.stats);
    info!(
        allocations = report.allocations,
        deallocations = report.deallocations,
        out_of_memory = report.out_of_memory,
        peak_bytes_in_use = report.stats.peak_bytes_in_use,
        "stress run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(size: usize) -> FreeingBumpAllocator<Vec<u8>> {
        FreeingBumpAllocator::new(vec![0u8; size], 0).unwrap()
    }

    #[test]
    fn test_pattern_depends_on_tag() {
        assert_eq!(pattern(0, 4), vec![0, 1, 2, 3]);
        assert_eq!(pattern(0xff, 2), vec![0xff, 0xfe]);
        assert_eq!(pattern(7, 300).len(), 300);
        assert!(pattern(0, 0).is_empty());
    }

    #[test]
    fn test_stress_frees_everything() {
        let config = StressConfig {
            ops: 2_000,
            seed: 1,
            max_size: 512,
        };
        let mut heap = heap(1 << 20);
        let mut last = 0;
        let report = run_stress(&mut heap, &config, |done| last = done).unwrap();

        assert_eq!(last, 2_000);
        assert_eq!(report.stats.bytes_in_use, 0);
        assert_eq!(report.stats.live_allocations, 0);
        assert_eq!(report.allocations, report.deallocations);
        assert!(report.stats.free_list_hits > 0);
    }

    #[test]
    fn test_stress_is_reproducible() {
        let config = StressConfig {
            ops: 1_000,
            seed: 42,
            max_size: 1024,
        };
        let first = run_stress(&mut heap(1 << 18), &config, |_| {}).unwrap();
        let second = run_stress(&mut heap(1 << 18), &config, |_| {}).unwrap();
        assert_eq!(first.allocations, second.allocations);
        assert_eq!(first.out_of_memory, second.out_of_memory);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn test_stress_tolerates_exhaustion() {
        let config = StressConfig {
            ops: 500,
            seed: 7,
            max_size: 256,
        };
        let report = run_stress(&mut heap(1024), &config, |_| {}).unwrap();
        assert!(report.out_of_memory > 0);
        assert_eq!(report.stats.bytes_in_use, 0);
        assert!(report.stats.peak_bytes_in_use <= 1024);
    }

    #[test]
    fn test_stress_rejects_oversized_max() {
        let config = StressConfig {
            max_size: MAX_POSSIBLE_ALLOCATION + 1,
            ..StressConfig::default()
        };
        let err = run_stress(&mut heap(64), &config, |_| {}).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
