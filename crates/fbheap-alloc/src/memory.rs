//! Host-owned linear memory.

/// A byte buffer the allocator manages but does not own the lifetime of.
///
/// The host allocates and frees the buffer. The allocator only reads and
/// writes bytes inside it and never resizes or relocates it.
pub trait LinearMemory {
    /// The whole buffer.
    fn as_bytes(&self) -> &[u8];

    /// The whole buffer, mutably.
    fn as_bytes_mut(&mut self) -> &mut [u8];

    /// Current length in bytes.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LinearMemory for [u8] {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl<const N: usize> LinearMemory for [u8; N] {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl LinearMemory for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl LinearMemory for Box<[u8]> {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl<T: LinearMemory + ?Sized> LinearMemory for &mut T {
    fn as_bytes(&self) -> &[u8] {
        (**self).as_bytes()
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        (**self).as_bytes_mut()
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}
