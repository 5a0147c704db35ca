//! Vectored I/O descriptors (`__wasi_ciovec_t`).

use crate::memory::GuestMemory;
use crate::MemResult;

/// One `(offset, length)` record as laid out in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    /// Guest pointer to the first byte of the buffer.
    pub offset: u32,
    /// Buffer length in bytes.
    pub len: u32,
}

impl IoVec {
    /// Size of one record: two little-endian `u32`s.
    pub const SIZE: u32 = 8;

    /// Decode the record stored at `addr`.
    pub fn read(memory: &GuestMemory<'_>, addr: u32) -> MemResult<Self> {
        Ok(Self {
            offset: memory.read_u32(addr)?,
            len: memory.read_u32(addr.wrapping_add(4))?,
        })
    }

    /// Encode this record at `addr`.
    pub fn write(&self, memory: &mut GuestMemory<'_>, addr: u32) -> MemResult<()> {
        memory.write_u32(addr, self.offset)?;
        memory.write_u32(addr.wrapping_add(4), self.len)
    }
}

/// Iterator over an iovec array of `count` records starting at `base`.
///
/// Records are decoded lazily, one per `next()`.
pub struct IoVecs<'m, 'a> {
    memory: &'m GuestMemory<'a>,
    base: u32,
    index: u32,
    count: u32,
}

impl<'m, 'a> IoVecs<'m, 'a> {
    pub fn new(memory: &'m GuestMemory<'a>, base: u32, count: u32) -> Self {
        Self {
            memory,
            base,
            index: 0,
            count,
        }
    }
}

impl Iterator for IoVecs<'_, '_> {
    type Item = MemResult<IoVec>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let addr = self
            .base
            .wrapping_add(self.index.wrapping_mul(IoVec::SIZE));
        self.index += 1;
        Some(IoVec::read(self.memory, addr))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.count - self.index) as usize;
        (left, Some(left))
    }
}


#[cfg(kani)]
mod proofs {
    use super::*;

    /// Any 8 bytes decode as two little-endian u32s.
    #[kani::proof]
    #[kani::unwind(9)]
    fn read_decodes_any_record() {
        let mut raw: [u8; 8] = kani::any();
        let expected = IoVec {
            offset: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            len: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        };
        let view = GuestMemory::new(&mut raw);
        kani::assert(IoVec::read(&view, 0) == Ok(expected), "little-endian decode");
    }
}
