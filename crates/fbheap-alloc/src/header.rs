//! The 8-byte block prefix.
//!
//! The same eight bytes mean different things depending on block state:
//!
//! ```text
//!   live:  [ class | FF FF FF FF FF FF FF ]
//!   free:  [ next link (u32 LE) | class | FE FE FE ]
//! ```
//!
//! A free link is the relative payload offset of the next free block of the
//! same class, or 0 at the end of the list. Payload offsets are at least
//! `PREFIX_SIZE`, so 0 never names a real block.
//!
//! Freeing rewrites all eight bytes rather than only the link word in bytes
//! 0..4. The live sentinel is gone once a block is free, so a stale pointer
//! decodes as free (a double free), and the class survives for list checks.

use crate::error::{HeapError, Result};
use crate::size_class::{ALIGNMENT, PREFIX_SIZE, SizeClass};

/// Sentinel filling bytes 1..8 of a live header.
const LIVE_MARKER: u8 = 0xFF;

/// Marker filling bytes 5..8 of a free header.
const FREE_MARKER: u8 = 0xFE;

/// Decoded block prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHeader {
    /// Handed out to a caller.
    Live { class: SizeClass },
    /// On a free list; `next` is the relative start of the next free block.
    Free {
        class: SizeClass,
        next: Option<u32>,
    },
}

impl BlockHeader {
    /// Encode into the on-heap representation.
    #[must_use]
    pub fn encode(self) -> [u8; PREFIX_SIZE as usize] {
        match self {
            Self::Live { class } => {
                let mut bytes = [LIVE_MARKER; PREFIX_SIZE as usize];
                bytes[0] = class.index();
                bytes
            }
            Self::Free { class, next } => {
                let link = next.map_or(0, |start| start + PREFIX_SIZE);
                let mut bytes = [FREE_MARKER; PREFIX_SIZE as usize];
                bytes[..4].copy_from_slice(&link.to_le_bytes());
                bytes[4] = class.index();
                bytes
            }
        }
    }

    /// Decode the prefix of the block starting at relative offset `at`.
    ///
    /// # Errors
    ///
    /// - [`HeapError::InvalidSizeClass`] for an intact marker with a class byte
    ///   out of range.
    /// - [`HeapError::CorruptedHeader`] when neither marker matches, or a free
    ///   link is not a valid payload offset.
    pub fn decode(bytes: [u8; PREFIX_SIZE as usize], at: u32) -> Result<Self> {
        if bytes[1..].iter().all(|&b| b == LIVE_MARKER) {
            let class = SizeClass::from_index(bytes[0])?;
            return Ok(Self::Live { class });
        }

        if bytes[5..].iter().all(|&b| b == FREE_MARKER) {
            let class = SizeClass::from_index(bytes[4])?;
            let link = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let next = match link {
                0 => None,
                l if l < PREFIX_SIZE || l % ALIGNMENT != 0 => {
                    return Err(HeapError::CorruptedHeader(at));
                }
                l => Some(l - PREFIX_SIZE),
            };
            return Ok(Self::Free { class, next });
        }

        Err(HeapError::CorruptedHeader(at))
    }
}
