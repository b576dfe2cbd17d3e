//! Heap configuration.

use std::fmt;

use fbheap_alloc::{FreeingBumpAllocator, LinearMemory};
use fbheap_memory::GuardedMemory;
use tracing::info;

use crate::error::{Error, Result};

/// Host memory backing the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backing {
    /// Zeroed `Vec<u8>` on the host heap.
    #[default]
    Vec,
    /// mmap region with guard pages on both sides.
    Guarded,
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vec => write!(f, "vec"),
            Self::Guarded => write!(f, "guarded"),
        }
    }
}

/// Memory selected by [`Backing`].
pub enum HostMemory {
    Vec(Vec<u8>),
    Guarded(GuardedMemory),
}

impl LinearMemory for HostMemory {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Vec(mem) => mem.as_slice(),
            Self::Guarded(mem) => mem.as_bytes(),
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Vec(mem) => mem.as_mut_slice(),
            Self::Guarded(mem) => mem.as_bytes_mut(),
        }
    }
}

/// Heap configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Total linear memory size in bytes, base offset region included.
    pub heap_size: usize,
    /// Requested heap base; rounded up to 8 by the allocator.
    pub base_offset: u32,
    pub backing: Backing,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            heap_size: 1 << 20,
            base_offset: 0,
            backing: Backing::Vec,
        }
    }
}

impl HeapConfig {
    /// Check the configuration before mapping anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty heap, a heap beyond the 32-bit
    /// offset space, or a base offset past the end.
    pub fn validate(&self) -> Result<()> {
        if self.heap_size == 0 {
            return Err(Error::Config("heap size must be non-zero".to_string()));
        }
        if u32::try_from(self.heap_size).is_err() {
            return Err(Error::Config(format!(
                "heap size {} exceeds the 32-bit address space",
                self.heap_size
            )));
        }
        if self.base_offset as usize >= self.heap_size {
            return Err(Error::Config(format!(
                "base offset {} must be below heap size {}",
                self.base_offset, self.heap_size
            )));
        }
        Ok(())
    }

    /// Allocate host memory and create an allocator over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or mapping fails.
    pub fn build(&self) -> Result<FreeingBumpAllocator<HostMemory>> {
        self.validate()?;
        let memory = match self.backing {
            Backing::Vec => HostMemory::Vec(vec![0u8; self.heap_size]),
            Backing::Guarded => HostMemory::Guarded(GuardedMemory::new(self.heap_size)?),
        };
        let heap = FreeingBumpAllocator::new(memory, self.base_offset)?;
        info!(
            heap_size = self.heap_size,
            base_offset = heap.base_offset(),
            usable_size = heap.usable_size(),
            backing = %self.backing,
            "heap ready"
        );
        Ok(heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builds() {
        let heap = HeapConfig::default().build().unwrap();
        assert_eq!(heap.usable_size(), 1 << 20);
    }

    #[test]
    fn test_guarded_backing() {
        let config = HeapConfig {
            heap_size: 1 << 16,
            base_offset: 3,
            backing: Backing::Guarded,
        };
        let mut heap = config.build().unwrap();
        assert_eq!(heap.base_offset(), 8);
        let ptr = heap.allocate(32).unwrap();
        heap.write(ptr, &[7; 32]).unwrap();
        assert!(matches!(heap.memory(), HostMemory::Guarded(_)));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let zero = HeapConfig {
            heap_size: 0,
            ..HeapConfig::default()
        };
        assert!(matches!(zero.validate(), Err(Error::Config(_))));

        let past_end = HeapConfig {
            heap_size: 64,
            base_offset: 64,
            ..HeapConfig::default()
        };
        assert!(matches!(past_end.validate(), Err(Error::Config(_))));
    }
}
