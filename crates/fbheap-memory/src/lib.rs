//! Host linear-memory sources for the freeing-bump heap.
//!
//! The allocator in `fbheap-alloc` works on anything implementing
//! [`LinearMemory`](fbheap_alloc::LinearMemory). Plain `Vec<u8>` buffers are
//! enough for most hosts; [`GuardedMemory`] adds `PROT_NONE` guard pages
//! around the heap so a stray access past either end faults immediately.

mod guarded;

pub use guarded::{GUARD_SIZE, GuardedMemory, MemoryError};
