use thiserror::Error;

/// Heap allocator errors.
///
/// Every failing `allocate`/`deallocate` leaves the allocator state exactly as
/// it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("requested allocation of {requested} bytes exceeds the {max} byte limit")]
    AllocationTooLarge { requested: u32, max: u32 },

    #[error("allocator out of space: {requested} bytes requested, {in_use} of {usable} in use")]
    OutOfMemory {
        requested: u32,
        in_use: u32,
        usable: u32,
    },

    #[error("invalid pointer for deallocation: {0:#x}")]
    InvalidPointer(u32),

    #[error("invalid size class index {0} in block header")]
    InvalidSizeClass(u8),

    #[error("corrupted free list for size class {class}: bad link {link:#x}")]
    CorruptedFreeList { class: u8, link: u32 },

    #[error("corrupted block header at {0:#x}")]
    CorruptedHeader(u32),

    #[error("double free of pointer {0:#x}")]
    DoubleFree(u32),

    #[error("heap access out of bounds: {len} bytes at {offset:#x}")]
    OutOfBounds { offset: u32, len: u32 },

    #[error("base offset {base:#x} lies beyond the heap length {heap_len:#x}")]
    BaseOffsetOutOfRange { base: u64, heap_len: usize },

    #[error("heap of {0} bytes does not fit a 32-bit address space")]
    HeapTooLarge(usize),
}

impl HeapError {
    /// Whether the same request may succeed later (after some deallocation).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    /// Short stable label, used as a metrics/log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AllocationTooLarge { .. } => "too_large",
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::InvalidPointer(_) => "invalid_pointer",
            Self::InvalidSizeClass(_) => "invalid_size_class",
            Self::CorruptedFreeList { .. } => "corrupted_free_list",
            Self::CorruptedHeader(_) => "corrupted_header",
            Self::DoubleFree(_) => "double_free",
            Self::OutOfBounds { .. } => "out_of_bounds",
            Self::BaseOffsetOutOfRange { .. } => "base_offset_out_of_range",
            Self::HeapTooLarge(_) => "heap_too_large",
        }
    }
}

pub type Result<T> = std::result::Result<T, HeapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_out_of_memory_is_retryable() {
        let oom = HeapError::OutOfMemory {
            requested: 16,
            in_use: 1024,
            usable: 1024,
        };
        assert!(oom.is_retryable());
        assert!(!HeapError::InvalidPointer(4).is_retryable());
        assert!(!HeapError::AllocationTooLarge { requested: 1, max: 0 }.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = HeapError::DoubleFree(0x18);
        assert_eq!(err.to_string(), "double free of pointer 0x18");
        assert_eq!(err.kind(), "double_free");
    }
}
