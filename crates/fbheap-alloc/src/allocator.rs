//! The freeing-bump allocator.

use std::fmt;
use std::ops::Range;

use tracing::{debug, trace};

use crate::error::{HeapError, Result};
use crate::header::BlockHeader;
use crate::memory::LinearMemory;
use crate::size_class::{ALIGNMENT, NUM_SIZE_CLASSES, PREFIX_SIZE, SizeClass};
use crate::stats::AllocatorStats;

/// Absolute heap offset of a payload (base offset included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(u32);

impl HeapPtr {
    #[must_use]
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0
    }
}

impl From<u32> for HeapPtr {
    fn from(offset: u32) -> Self {
        Self(offset)
    }
}

impl From<HeapPtr> for u32 {
    fn from(ptr: HeapPtr) -> Self {
        ptr.0
    }
}

impl fmt::Display for HeapPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Freeing-bump allocator over a host-owned linear memory.
///
/// Offsets stored internally (`bumper`, free-list heads, block starts) are
/// relative to `base_offset`; only [`HeapPtr`] values are absolute.
///
/// The allocator is a plain value: one instance per memory, driven from one
/// place. Wrap it in a lock if several threads need it.
///
/// Block boundaries are tracked in a bitmap held outside the heap, one bit per
/// 8-byte granule of the bumped region. Headers live in guest-writable memory,
/// so a pointer is only trusted if it lands on a boundary the bumper created.
pub struct FreeingBumpAllocator<M: LinearMemory> {
    memory: M,
    bumper: u32,
    heads: [Option<u32>; NUM_SIZE_CLASSES],
    slot_starts: Vec<u64>,
    base_offset: u32,
    usable_size: u32,
    bytes_in_use: u32,
    peak_bytes_in_use: u32,
    live_allocations: u32,
    total_allocations: u64,
    total_deallocations: u64,
    free_list_hits: u64,
}

impl<M: LinearMemory> FreeingBumpAllocator<M> {
    /// Create an allocator managing `memory` from `requested_base_offset` on.
    ///
    /// The base is rounded up to the next multiple of 8, and everything from
    /// there to the current end of `memory` becomes the usable region.
    ///
    /// # Errors
    ///
    /// - [`HeapError::HeapTooLarge`] if `memory` exceeds the 32-bit offset space.
    /// - [`HeapError::BaseOffsetOutOfRange`] if the aligned base lies past the end.
    pub fn new(memory: M, requested_base_offset: u32) -> Result<Self> {
        let heap_len = memory.len();
        let heap_len_u32 = u32::try_from(heap_len).map_err(|_| HeapError::HeapTooLarge(heap_len))?;

        let out_of_range = HeapError::BaseOffsetOutOfRange {
            base: u64::from(requested_base_offset),
            heap_len,
        };
        let base_offset = requested_base_offset
            .checked_next_multiple_of(ALIGNMENT)
            .ok_or_else(|| out_of_range.clone())?;
        let usable_size = heap_len_u32.checked_sub(base_offset).ok_or(out_of_range)?;

        debug!(
            base_offset,
            requested_base_offset, usable_size, "created freeing-bump allocator"
        );

        Ok(Self {
            memory,
            bumper: 0,
            heads: [None; NUM_SIZE_CLASSES],
            slot_starts: Vec::new(),
            base_offset,
            usable_size,
            bytes_in_use: 0,
            peak_bytes_in_use: 0,
            live_allocations: 0,
            total_allocations: 0,
            total_deallocations: 0,
            free_list_hits: 0,
        })
    }

    /// Allocate at least `size` bytes and return the payload pointer.
    ///
    /// The pointer is 8-byte aligned. The 8 bytes before it hold the block
    /// header and must not be written by the caller.
    ///
    /// # Errors
    ///
    /// - [`HeapError::AllocationTooLarge`] above 16 MiB.
    /// - [`HeapError::OutOfMemory`] if the block would not fit.
    /// - [`HeapError::CorruptedFreeList`] if the free block to reuse has been
    ///   overwritten.
    pub fn allocate(&mut self, size: u32) -> Result<HeapPtr> {
        let class = SizeClass::for_size(size)?;
        let slot = class.slot_size();
        let index = usize::from(class.index());

        let out_of_memory = || HeapError::OutOfMemory {
            requested: size,
            in_use: self.bytes_in_use,
            usable: self.usable_size,
        };

        let bytes_in_use = self
            .bytes_in_use
            .checked_add(slot)
            .filter(|&total| total <= self.usable_size)
            .ok_or_else(out_of_memory)?;

        let (block_start, next_head) = if let Some(start) = self.heads[index] {
            (start, Some(self.free_link(class, start)?))
        } else {
            let end = self
                .bumper
                .checked_add(slot)
                .filter(|&end| end <= self.usable_size)
                .ok_or_else(out_of_memory)?;
            trace!(bumper = end, "bumped");
            (self.bumper, None)
        };

        self.write_live_header(block_start, class)?;

        match next_head {
            Some(next) => {
                self.heads[index] = next;
                self.free_list_hits += 1;
            }
            None => {
                self.mark_slot_start(block_start);
                self.bumper += slot;
            }
        }
        self.bytes_in_use = bytes_in_use;
        self.peak_bytes_in_use = self.peak_bytes_in_use.max(bytes_in_use);
        self.live_allocations += 1;
        self.total_allocations += 1;

        let ptr = HeapPtr(self.base_offset + block_start + PREFIX_SIZE);
        trace!(
            %ptr,
            size,
            class = class.index(),
            bytes_in_use = self.bytes_in_use,
            "allocated"
        );
        Ok(ptr)
    }

    /// Return a block to the free list of its size class.
    ///
    /// # Errors
    ///
    /// - [`HeapError::InvalidPointer`] if `ptr` cannot be a payload this
    ///   allocator handed out.
    /// - [`HeapError::DoubleFree`] if the block is already free.
    /// - [`HeapError::InvalidSizeClass`] / [`HeapError::CorruptedHeader`] if
    ///   the header bytes have been overwritten.
    pub fn deallocate(&mut self, ptr: HeapPtr) -> Result<()> {
        let (block_start, class) = self.live_block(ptr)?;
        let index = usize::from(class.index());

        let bytes_in_use = self
            .bytes_in_use
            .checked_sub(class.slot_size())
            .ok_or(HeapError::CorruptedHeader(self.base_offset + block_start))?;

        self.write_free_link(block_start, class, self.heads[index])?;
        self.heads[index] = Some(block_start);

        self.bytes_in_use = bytes_in_use;
        self.live_allocations = self.live_allocations.saturating_sub(1);
        self.total_deallocations += 1;

        trace!(
            %ptr,
            class = class.index(),
            bytes_in_use = self.bytes_in_use,
            "deallocated"
        );
        Ok(())
    }

    /// Payload capacity of the live block at `ptr`.
    ///
    /// # Errors
    ///
    /// Same validation as [`Self::deallocate`].
    pub fn block_capacity(&self, ptr: HeapPtr) -> Result<u32> {
        let (_, class) = self.live_block(ptr)?;
        Ok(class.block_size())
    }

    /// Read `len` payload bytes of the live block at `ptr`.
    ///
    /// # Errors
    ///
    /// [`HeapError::OutOfBounds`] if `len` exceeds the block capacity, plus the
    /// pointer validation of [`Self::deallocate`].
    pub fn read(&self, ptr: HeapPtr, len: u32) -> Result<&[u8]> {
        let range = self.payload_range(ptr, len)?;
        Ok(&self.memory.as_bytes()[range])
    }

    /// Copy `data` to the start of the live block at `ptr`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn write(&mut self, ptr: HeapPtr, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| HeapError::OutOfBounds {
            offset: ptr.0,
            len: u32::MAX,
        })?;
        let range = self.payload_range(ptr, len)?;
        self.memory.as_bytes_mut()[range].copy_from_slice(data);
        Ok(())
    }

    /// Number of blocks on the free list of `class`.
    ///
    /// # Errors
    ///
    /// [`HeapError::CorruptedFreeList`] if the list is broken or cyclic.
    pub fn free_list_len(&self, class: SizeClass) -> Result<usize> {
        let max_blocks = (self.bumper / class.slot_size()) as usize;
        let mut len = 0;
        let mut cursor = self.heads[usize::from(class.index())];
        while let Some(start) = cursor {
            if len >= max_blocks {
                return Err(HeapError::CorruptedFreeList {
                    class: class.index(),
                    link: start + PREFIX_SIZE,
                });
            }
            cursor = self.free_link(class, start)?;
            len += 1;
        }
        Ok(len)
    }

    /// Forget every allocation and start bumping from the base again.
    ///
    /// Heap bytes are left as they are.
    pub fn reset(&mut self) {
        debug!(
            bumper = self.bumper,
            bytes_in_use = self.bytes_in_use,
            "resetting allocator"
        );
        self.bumper = 0;
        self.heads = [None; NUM_SIZE_CLASSES];
        self.slot_starts.clear();
        self.bytes_in_use = 0;
        self.peak_bytes_in_use = 0;
        self.live_allocations = 0;
        self.total_allocations = 0;
        self.total_deallocations = 0;
        self.free_list_hits = 0;
    }

    #[must_use]
    pub const fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            base_offset: self.base_offset,
            usable_size: self.usable_size,
            bumper: self.bumper,
            bytes_in_use: self.bytes_in_use,
            peak_bytes_in_use: self.peak_bytes_in_use,
            live_allocations: self.live_allocations,
            total_allocations: self.total_allocations,
            total_deallocations: self.total_deallocations,
            free_list_hits: self.free_list_hits,
        }
    }

    #[must_use]
    pub const fn base_offset(&self) -> u32 {
        self.base_offset
    }

    #[must_use]
    pub const fn usable_size(&self) -> u32 {
        self.usable_size
    }

    #[must_use]
    pub const fn bytes_in_use(&self) -> u32 {
        self.bytes_in_use
    }

    #[must_use]
    pub const fn bumper(&self) -> u32 {
        self.bumper
    }

    /// Relative start of the most recently freed block of `class`.
    #[must_use]
    pub const fn free_list_head(&self, class: SizeClass) -> Option<u32> {
        self.heads[class.index() as usize]
    }

    #[must_use]
    pub const fn memory(&self) -> &M {
        &self.memory
    }

    /// Raw access to the host memory. Writing into a block prefix corrupts
    /// the heap; later calls will report it as an error.
    pub const fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    #[must_use]
    pub fn into_memory(self) -> M {
        self.memory
    }

    // ------------------------------------------------------------------------
    // Header access
    // ------------------------------------------------------------------------

    /// Decode the prefix of the block starting at relative offset `block_start`.
    fn read_header(&self, block_start: u32) -> Result<BlockHeader> {
        let range = self.heap_range(block_start, PREFIX_SIZE)?;
        let mut bytes = [0u8; PREFIX_SIZE as usize];
        bytes.copy_from_slice(&self.memory.as_bytes()[range]);
        BlockHeader::decode(bytes, self.base_offset + block_start)
    }

    fn write_live_header(&mut self, block_start: u32, class: SizeClass) -> Result<()> {
        self.write_header(block_start, BlockHeader::Live { class })
    }

    fn write_free_link(
        &mut self,
        block_start: u32,
        class: SizeClass,
        next: Option<u32>,
    ) -> Result<()> {
        self.write_header(block_start, BlockHeader::Free { class, next })
    }

    fn write_header(&mut self, block_start: u32, header: BlockHeader) -> Result<()> {
        let range = self.heap_range(block_start, PREFIX_SIZE)?;
        self.memory.as_bytes_mut()[range].copy_from_slice(&header.encode());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Block boundaries
    // ------------------------------------------------------------------------

    fn mark_slot_start(&mut self, block_start: u32) {
        let granule = (block_start / ALIGNMENT) as usize;
        let word = granule / 64;
        if word >= self.slot_starts.len() {
            self.slot_starts.resize(word + 1, 0);
        }
        self.slot_starts[word] |= 1 << (granule % 64);
    }

    /// Whether the bumper once started a block at `block_start`.
    fn is_slot_start(&self, block_start: u32) -> bool {
        if !block_start.is_multiple_of(ALIGNMENT) {
            return false;
        }
        let granule = (block_start / ALIGNMENT) as usize;
        self.slot_starts
            .get(granule / 64)
            .is_some_and(|word| word & (1 << (granule % 64)) != 0)
    }

    /// Whether a whole block of `class` starting at `block_start` has been bumped.
    fn is_bumped_block(&self, block_start: u32, class: SizeClass) -> bool {
        self.is_slot_start(block_start)
            && block_start
                .checked_add(class.slot_size())
                .is_some_and(|end| end <= self.bumper)
    }

    /// Read the link of the free block at `block_start`, validating both ends.
    fn free_link(&self, class: SizeClass, block_start: u32) -> Result<Option<u32>> {
        let corrupted = |start: u32| HeapError::CorruptedFreeList {
            class: class.index(),
            link: start + PREFIX_SIZE,
        };

        if !self.is_bumped_block(block_start, class) {
            return Err(corrupted(block_start));
        }
        match self.read_header(block_start) {
            Ok(BlockHeader::Free { class: found, next }) if found == class => match next {
                Some(next) if !self.is_bumped_block(next, class) => Err(corrupted(next)),
                _ => Ok(next),
            },
            _ => Err(corrupted(block_start)),
        }
    }

    /// Validate `ptr` as the payload of a live block.
    fn live_block(&self, ptr: HeapPtr) -> Result<(u32, SizeClass)> {
        let invalid = HeapError::InvalidPointer(ptr.0);
        let block_start = ptr
            .0
            .checked_sub(self.base_offset)
            .and_then(|rel| rel.checked_sub(PREFIX_SIZE))
            .ok_or_else(|| invalid.clone())?;

        if block_start + PREFIX_SIZE > self.bumper || !self.is_slot_start(block_start) {
            return Err(invalid);
        }

        let class = match self.read_header(block_start)? {
            BlockHeader::Live { class } => class,
            BlockHeader::Free { .. } => return Err(HeapError::DoubleFree(ptr.0)),
        };

        if !self.is_bumped_block(block_start, class) {
            return Err(invalid);
        }
        Ok((block_start, class))
    }

    fn payload_range(&self, ptr: HeapPtr, len: u32) -> Result<Range<usize>> {
        let (block_start, class) = self.live_block(ptr)?;
        if len > class.block_size() {
            return Err(HeapError::OutOfBounds { offset: ptr.0, len });
        }
        self.heap_range(block_start + PREFIX_SIZE, len)
    }

    /// Byte range in `memory` for `len` bytes at relative `offset`.
    fn heap_range(&self, offset: u32, len: u32) -> Result<Range<usize>> {
        let out_of_bounds = || HeapError::OutOfBounds {
            offset: self.base_offset.saturating_add(offset),
            len,
        };

        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.usable_size)
            .ok_or_else(out_of_bounds)?;

        let start = self.base_offset as usize + offset as usize;
        let end = self.base_offset as usize + end as usize;
        if end > self.memory.len() {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }
}

impl<M: LinearMemory> fmt::Debug for FreeingBumpAllocator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeingBumpAllocator")
            .field("base_offset", &self.base_offset)
            .field("usable_size", &self.usable_size)
            .field("bumper", &self.bumper)
            .field("bytes_in_use", &self.bytes_in_use)
            .field("heads", &self.heads)
            .finish_non_exhaustive()
    }
}
