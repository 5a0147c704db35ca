//! Guest linear memory bridge: `GuestMemory` and `LinearMemory`.
//!
//! `GuestMemory<'a>` is the single view type every host call goes through:
//! a mutable borrow of the guest's bytes with typed little-endian accessors.
//! It wraps whatever owns the bytes: the interpreter's memory of a loaded
//! instance, or a `LinearMemory` arena owned by the embedder.
//!
//! Accessors use the **outline pattern**: each method is a thin wrapper over
//! a non-generic inner function on `&[u8]`, so the bounds-checking logic
//! exists exactly once in the binary.

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::{MemResult, MemoryFault, PAGE_SIZE};

/// Borrowed view over guest linear memory.
///
/// Offsets are guest pointers (`u32`). Out-of-range accesses return
/// `MemoryFault::OutOfBounds`; nothing here panics.
pub struct GuestMemory<'a> {
    bytes: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    /// Wrap the raw bytes of a linear memory.
    #[inline(always)]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Current size in bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    // ── Loads ─────────────────────────────────────────────────────────

    #[inline(always)]
    pub fn read_u8(&self, offset: u32) -> MemResult<u8> {
        let s = checked_slice(self.bytes, offset, 1)?;
        Ok(s[0])
    }

    #[inline(always)]
    pub fn read_u32(&self, offset: u32) -> MemResult<u32> {
        read_u32_inner(self.bytes, offset)
    }

    #[inline(always)]
    pub fn read_u64(&self, offset: u32) -> MemResult<u64> {
        read_u64_inner(self.bytes, offset)
    }

    // ── Stores ────────────────────────────────────────────────────────

    #[inline(always)]
    pub fn write_u8(&mut self, offset: u32, value: u8) -> MemResult<()> {
        let s = checked_slice_mut(self.bytes, offset, 1)?;
        s[0] = value;
        Ok(())
    }

    #[inline(always)]
    pub fn write_u32(&mut self, offset: u32, value: u32) -> MemResult<()> {
        write_bytes_inner(self.bytes, offset, &value.to_le_bytes())
    }

    #[inline(always)]
    pub fn write_u64(&mut self, offset: u32, value: u64) -> MemResult<()> {
        write_bytes_inner(self.bytes, offset, &value.to_le_bytes())
    }

    /// Copy `data` into memory starting at `offset`.
    #[inline(always)]
    pub fn write_bytes(&mut self, offset: u32, data: &[u8]) -> MemResult<()> {
        write_bytes_inner(self.bytes, offset, data)
    }

    // ── Ranges ────────────────────────────────────────────────────────

    /// Read-only view of `len` bytes starting at `offset`.
    #[inline(always)]
    pub fn slice(&self, offset: u32, len: u32) -> MemResult<&[u8]> {
        checked_slice(self.bytes, offset, len)
    }

    /// Decode `len` bytes at `offset` as UTF-8 text.
    ///
    /// Invalid sequences are replaced with U+FFFD and one leading byte-order
    /// mark is dropped, matching a browser `TextDecoder("utf-8")` in its
    /// default (non-fatal, BOM-stripping) mode.
    pub fn read_text(&self, offset: u32, len: u32) -> MemResult<Cow<'_, str>> {
        let bytes = checked_slice(self.bytes, offset, len)?;
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        Ok(String::from_utf8_lossy(bytes))
    }

    /// The whole memory as bytes.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        self.bytes
    }
}

/// An owned, fixed-size linear memory arena.
///
/// Allocated once at `pages * PAGE_SIZE` zeroed bytes and never grown.
pub struct LinearMemory {
    bytes: Vec<u8>,
}

impl LinearMemory {
    /// Allocate `pages` zeroed Wasm pages.
    pub fn new(pages: u32) -> Self {
        Self {
            bytes: vec![0u8; pages as usize * PAGE_SIZE],
        }
    }

    /// Number of pages.
    #[inline(always)]
    pub fn page_count(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    /// Size in bytes.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Borrow the arena through the typed accessor view.
    #[inline(always)]
    pub fn view(&mut self) -> GuestMemory<'_> {
        GuestMemory::new(&mut self.bytes)
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[inline(always)]
fn out_of_bounds(offset: u32, len: u32, size: usize) -> MemoryFault {
    MemoryFault::OutOfBounds { offset, len, size }
}

/// Bounds-check and return `memory[offset..offset+len]`.
#[inline(always)]
fn checked_slice(memory: &[u8], offset: u32, len: u32) -> MemResult<&[u8]> {
    let start = offset as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| out_of_bounds(offset, len, memory.len()))?;
    memory
        .get(start..end)
        .ok_or_else(|| out_of_bounds(offset, len, memory.len()))
}

/// Mutable variant of `checked_slice`.
#[inline(always)]
fn checked_slice_mut(memory: &mut [u8], offset: u32, len: u32) -> MemResult<&mut [u8]> {
    let size = memory.len();
    let start = offset as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| out_of_bounds(offset, len, size))?;
    memory
        .get_mut(start..end)
        .ok_or_else(|| out_of_bounds(offset, len, size))
}

// ── Non-generic inner functions (outline pattern) ─────────────────────

#[inline(never)]
fn read_u32_inner(memory: &[u8], offset: u32) -> MemResult<u32> {
    let s = checked_slice(memory, offset, 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(s);
    Ok(u32::from_le_bytes(buf))
}

#[inline(never)]
fn read_u64_inner(memory: &[u8], offset: u32) -> MemResult<u64> {
    let s = checked_slice(memory, offset, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(s);
    Ok(u64::from_le_bytes(buf))
}

#[inline(never)]
fn write_bytes_inner(memory: &mut [u8], offset: u32, data: &[u8]) -> MemResult<()> {
    let len = u32::try_from(data.len()).map_err(|_| out_of_bounds(offset, u32::MAX, memory.len()))?;
    let s = checked_slice_mut(memory, offset, len)?;
    s.copy_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_is_zeroed() {
        let mut mem = LinearMemory::new(1);
        assert_eq!(mem.page_count(), 1);
        assert_eq!(mem.size(), PAGE_SIZE);
        let view = mem.view();
        assert_eq!(view.read_u64(0), Ok(0));
        assert_eq!(view.read_u64(PAGE_SIZE as u32 - 8), Ok(0));
    }

    #[test]
    fn u32_is_little_endian() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        view.write_u32(16, 0x1122_3344).unwrap();
        assert_eq!(view.slice(16, 4).unwrap(), &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(view.read_u32(16), Ok(0x1122_3344));
        assert_eq!(view.read_u8(16), Ok(0x44));
    }

    #[test]
    fn u64_is_little_endian() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        view.write_u64(8, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(view.read_u32(8), Ok(0x0506_0708));
        assert_eq!(view.read_u32(12), Ok(0x0102_0304));
    }

    #[test]
    fn unaligned_access_is_fine() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        view.write_u32(3, u32::MAX).unwrap();
        assert_eq!(view.read_u32(3), Ok(u32::MAX));
        assert_eq!(view.read_u8(2), Ok(0));
        assert_eq!(view.read_u8(7), Ok(0));
    }

    #[test]
    fn last_valid_offsets() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        let end = PAGE_SIZE as u32;
        assert!(view.write_u8(end - 1, 1).is_ok());
        assert!(view.write_u32(end - 4, 1).is_ok());
        assert!(view.write_u64(end - 8, 1).is_ok());
    }

    #[test]
    fn out_of_bounds_is_a_fault_not_a_panic() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        let end = PAGE_SIZE as u32;
        assert_eq!(
            view.read_u32(end - 3),
            Err(MemoryFault::OutOfBounds {
                offset: end - 3,
                len: 4,
                size: PAGE_SIZE
            })
        );
        assert!(view.write_u64(end - 4, 0).is_err());
        assert!(view.read_u8(end).is_err());
        assert!(view.slice(u32::MAX, 2).is_err());
    }

    #[test]
    fn read_text_decodes_utf8() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        view.write_bytes(100, "héllo".as_bytes()).unwrap();
        assert_eq!(view.read_text(100, 6).unwrap(), "héllo");
    }

    #[test]
    fn read_text_replaces_invalid_sequences() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        view.write_bytes(0, &[b'a', 0xFF, b'b']).unwrap();
        assert_eq!(view.read_text(0, 3).unwrap(), "a\u{FFFD}b");
    }

    #[test]
    fn read_text_drops_one_leading_bom() {
        let mut mem = LinearMemory::new(1);
        let mut view = mem.view();
        view.write_bytes(0, &[0xEF, 0xBB, 0xBF, b'h', b'i']).unwrap();
        assert_eq!(view.read_text(0, 5).unwrap(), "hi");
        assert_eq!(view.read_text(0, 3).unwrap(), "");

        view.write_bytes(16, &[0xEF, 0xBB, 0xBF, 0xEF, 0xBB, 0xBF]).unwrap();
        assert_eq!(view.read_text(16, 6).unwrap(), "\u{FEFF}");

        // A BOM after the first byte is ordinary text.
        view.write_bytes(32, &[b'a', 0xEF, 0xBB, 0xBF]).unwrap();
        assert_eq!(view.read_text(32, 4).unwrap(), "a\u{FEFF}");
    }

    #[test]
    fn zero_length_slice_at_end() {
        let mut mem = LinearMemory::new(1);
        let view = mem.view();
        assert_eq!(view.slice(PAGE_SIZE as u32, 0).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn view_over_borrowed_bytes() {
        let mut raw = [0u8; 16];
        {
            let mut view = GuestMemory::new(&mut raw);
            assert_eq!(view.len(), 16);
            view.write_u32(0, 7).unwrap();
        }
        assert_eq!(raw[0], 7);
    }
}

// ── Kani proofs ───────────────────────────────────────────────────────
//
// The proofs establish that the bounds-checked helpers either succeed or
// return Err for every offset and length, and that a successful access
// lies entirely inside the memory.

#[cfg(kani)]
mod proofs {
    use super::*;

    const SIZE: usize = 64;

    /// checked_slice never panics; Ok implies the range is in bounds.
    #[kani::proof]
    #[kani::unwind(1)]
    fn checked_slice_never_panics() {
        let memory = [0u8; SIZE];
        let offset: u32 = kani::any();
        let len: u32 = kani::any();

        if let Ok(s) = checked_slice(&memory, offset, len) {
            kani::assert(s.len() == len as usize, "slice has requested length");
            kani::assert(
                offset as usize + len as usize <= SIZE,
                "successful slice must be within memory",
            );
        }
    }

    /// read_u32_inner never panics for any offset.
    #[kani::proof]
    #[kani::unwind(5)]
    fn read_u32_never_panics() {
        let memory: [u8; SIZE] = kani::any();
        let offset: u32 = kani::any();
        let result = read_u32_inner(&memory, offset);
        kani::assert(
            result.is_ok() == (offset as usize + 4 <= SIZE),
            "read succeeds exactly when in bounds",
        );
    }

    /// write_bytes_inner only touches the addressed range.
    #[kani::proof]
    #[kani::unwind(9)]
    fn write_bytes_stays_in_bounds() {
        let mut memory = [0u8; SIZE];
        let offset: u32 = kani::any();
        let data: [u8; 4] = kani::any();

        let result = write_bytes_inner(&mut memory, offset, &data);
        if result.is_ok() {
            let start = offset as usize;
            kani::assert(start + 4 <= SIZE, "write must be within memory");
            kani::assert(memory[start..start + 4] == data, "bytes were written");
        } else {
            kani::assert(offset as usize + 4 > SIZE, "in-bounds write must succeed");
        }
    }
}
