//! Guarded heap memory backed by mmap.
//!
//! The region is laid out as `[GUARD][HEAP][GUARD]`. Only the heap in the
//! middle is readable and writable.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use fbheap_alloc::LinearMemory;
use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};
use thiserror::Error;
use tracing::debug;

/// Guard page size (16KB, must be >= page size).
pub const GUARD_SIZE: usize = 1 << 14;

/// Memory mapping error.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("mmap failed: {0}")]
    MmapFailed(#[from] nix::Error),

    #[error("invalid memory size: {0}")]
    InvalidSize(usize),
}

/// Heap region with guard pages on both sides.
pub struct GuardedMemory {
    /// Start of the entire mapping (including the first guard).
    region: NonNull<c_void>,
    /// Mapping size including both guards.
    total_size: usize,
    /// Size of the readable/writable heap.
    memory_size: usize,
}

impl GuardedMemory {
    /// Map a new guarded heap of `memory_size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or overflows, or if mmap fails.
    pub fn new(memory_size: usize) -> Result<Self, MemoryError> {
        if memory_size == 0 {
            return Err(MemoryError::InvalidSize(memory_size));
        }

        let total_size = memory_size
            .checked_add(2 * GUARD_SIZE)
            .ok_or(MemoryError::InvalidSize(memory_size))?;
        let total_size_nz =
            NonZeroUsize::new(total_size).ok_or(MemoryError::InvalidSize(memory_size))?;

        // Reserve everything as PROT_NONE, then open up the middle.
        let region = unsafe {
            mmap_anonymous(
                None,
                total_size_nz,
                ProtFlags::PROT_NONE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_NORESERVE,
            )?
        };

        let memory_start = unsafe {
            NonNull::new_unchecked(region.as_ptr().cast::<u8>().add(GUARD_SIZE).cast::<c_void>())
        };
        let protected = unsafe {
            mprotect(
                memory_start,
                memory_size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            )
        };
        if let Err(e) = protected {
            unsafe {
                let _ = munmap(region, total_size);
            }
            return Err(e.into());
        }

        debug!(memory_size, guard = GUARD_SIZE, "mapped guarded heap");

        Ok(Self {
            region,
            total_size,
            memory_size,
        })
    }

    /// Returns pointer to the heap (after the first guard page).
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        unsafe { self.region.as_ptr().cast::<u8>().add(GUARD_SIZE) }
    }

    /// Returns the size of the heap.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.memory_size
    }

    /// Zero the entire heap.
    pub const fn clear(&mut self) {
        unsafe {
            std::ptr::write_bytes(self.as_ptr(), 0, self.memory_size);
        }
    }
}

impl LinearMemory for GuardedMemory {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: the heap is mapped read/write for `memory_size` bytes for
        // as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.memory_size) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.memory_size) }
    }

    fn len(&self) -> usize {
        self.memory_size
    }
}

impl Drop for GuardedMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.region, self.total_size);
        }
    }
}

// GuardedMemory is Send but not Sync (contains raw pointer)
unsafe impl Send for GuardedMemory {}
