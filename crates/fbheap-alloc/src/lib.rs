//! Freeing-bump heap allocator for sandboxed VM linear memory.
//!
//! The allocator carves blocks out of a host-owned byte buffer. Every request
//! is rounded up to one of [`NUM_SIZE_CLASSES`] power-of-two size classes
//! (8 bytes to 16 MiB). Freed blocks are pushed onto an intrusive per-class
//! free list whose links live inside the heap itself; new blocks are bumped
//! from a monotonic cursor only when the matching list is empty.
//!
//! ```text
//!   base_offset                                   bumper        usable_size
//!   │                                              │                  │
//!   ▼                                              ▼                  ▼
//!   ┌────────┬─────────┬────────┬────────────────┬──────────────────────┐
//!   │ prefix │ 8 bytes │ prefix │    16 bytes    │        unused        │
//!   └────────┴─────────┴────────┴────────────────┴──────────────────────┘
//!            ▲                  ▲
//!            └── HeapPtr        └── HeapPtr
//! ```
//!
//! # Example
//!
//! ```
//! use fbheap_alloc::FreeingBumpAllocator;
//!
//! let mut heap = vec![0u8; 1024];
//! let mut alloc = FreeingBumpAllocator::new(&mut heap, 0)?;
//!
//! let ptr = alloc.allocate(4)?;
//! alloc.write(ptr, b"abcd")?;
//! assert_eq!(alloc.read(ptr, 4)?, b"abcd");
//!
//! alloc.deallocate(ptr)?;
//! assert_eq!(alloc.allocate(4)?, ptr);
//! # Ok::<(), fbheap_alloc::HeapError>(())
//! ```

mod allocator;
mod error;
mod header;
mod memory;
pub mod size_class;
mod stats;

pub use allocator::{FreeingBumpAllocator, HeapPtr};
pub use error::{HeapError, Result};
pub use header::BlockHeader;
pub use memory::LinearMemory;
pub use size_class::{
    ALIGNMENT, MAX_POSSIBLE_ALLOCATION, MIN_POSSIBLE_ALLOCATION, NUM_SIZE_CLASSES, PREFIX_SIZE,
    SizeClass,
};
pub use stats::AllocatorStats;
