//! Power-of-two size classes.
//!
//! Block sizes are exactly `8 << index` for `index` in `0..NUM_SIZE_CLASSES`,
//! covering 8 bytes up to [`MAX_POSSIBLE_ALLOCATION`].

use crate::error::{HeapError, Result};

/// Alignment of every payload pointer and of the heap base.
pub const ALIGNMENT: u32 = 8;

/// Size of the header preceding each payload.
pub const PREFIX_SIZE: u32 = 8;

/// Smallest block size.
pub const MIN_POSSIBLE_ALLOCATION: u32 = 8;

/// Largest single allocation (16 MiB).
pub const MAX_POSSIBLE_ALLOCATION: u32 = 1 << 24;

/// Number of size classes (8 B .. 16 MiB).
pub const NUM_SIZE_CLASSES: usize = 22;

/// Round a request up to its block size.
///
/// Returns 8 for anything below 8, otherwise the next power of two. Callers
/// must reject sizes above [`MAX_POSSIBLE_ALLOCATION`] first.
#[must_use]
pub const fn round_up_to_class(size: u32) -> u32 {
    if size < MIN_POSSIBLE_ALLOCATION {
        MIN_POSSIBLE_ALLOCATION
    } else {
        size.next_power_of_two()
    }
}

/// Free-list index of an exact block size.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn class_index(block_size: u32) -> u8 {
    debug_assert!(block_size.is_power_of_two() && block_size >= MIN_POSSIBLE_ALLOCATION);
    // trailing_zeros of a u32 is at most 32, so it fits a u8.
    (block_size.trailing_zeros() - 3) as u8
}

/// A validated size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeClass(u8);

impl SizeClass {
    /// Smallest class that fits `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::AllocationTooLarge`] above [`MAX_POSSIBLE_ALLOCATION`].
    pub const fn for_size(size: u32) -> Result<Self> {
        if size > MAX_POSSIBLE_ALLOCATION {
            return Err(HeapError::AllocationTooLarge {
                requested: size,
                max: MAX_POSSIBLE_ALLOCATION,
            });
        }
        Ok(Self(class_index(round_up_to_class(size))))
    }

    /// Class for a raw index, e.g. one read back from a block header.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidSizeClass`] when `index >= NUM_SIZE_CLASSES`.
    pub const fn from_index(index: u8) -> Result<Self> {
        if (index as usize) < NUM_SIZE_CLASSES {
            Ok(Self(index))
        } else {
            Err(HeapError::InvalidSizeClass(index))
        }
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// Payload bytes available in a block of this class.
    #[must_use]
    pub const fn block_size(self) -> u32 {
        MIN_POSSIBLE_ALLOCATION << self.0
    }

    /// Block size plus prefix: what the class costs in the heap.
    #[must_use]
    pub const fn slot_size(self) -> u32 {
        self.block_size() + PREFIX_SIZE
    }

    /// All classes, smallest first.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..NUM_SIZE_CLASSES as u8).map(Self)
    }
}
