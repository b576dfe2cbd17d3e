//! fbheap - freeing-bump heap for sandboxed VM linear memory.
//!
//! The allocator itself lives in `fbheap-alloc` and the mmap-backed heap in
//! `fbheap-memory`. This crate ties them together for hosts and tooling:
//! heap configuration, workload-script replay, randomized stress runs, and
//! metrics.
//!
//! # Example
//!
//! ```
//! use fbheap::HeapConfig;
//! use fbheap::script::{ReplayOptions, Script};
//!
//! let mut heap = HeapConfig::default().build()?;
//! let script = Script::parse("alloc a 16\nwrite a 0102\nfree a\n")?;
//! let report = script.replay(&mut heap, &ReplayOptions::default())?;
//! assert_eq!(report.stats.bytes_in_use, 0);
//! # Ok::<(), fbheap::Error>(())
//! ```

pub use fbheap_alloc::{
    AllocatorStats, BlockHeader, FreeingBumpAllocator, HeapError, HeapPtr, LinearMemory,
    MAX_POSSIBLE_ALLOCATION, NUM_SIZE_CLASSES, PREFIX_SIZE, SizeClass,
};
pub use fbheap_memory::{GUARD_SIZE, GuardedMemory, MemoryError};

mod config;
mod error;
pub mod metrics;
pub mod script;
pub mod stress;

pub use config::{Backing, HeapConfig, HostMemory};
pub use error::{Error, Result};

/// Allocator over whichever host memory the configuration selected.
pub type Heap = FreeingBumpAllocator<HostMemory>;
