//! `wasi-shim-runtime`: guest-memory bridge and WASI syscall subset.
//!
//! This crate is `#![no_std]` (it needs `alloc` for text decoding). It provides:
//! - `GuestMemory` / `LinearMemory` for little-endian access to Wasm linear memory
//! - `IoVec` decoding for vectored writes
//! - The fixed `HostCall` table and the pure syscall handlers in [`syscalls`]

#![no_std]

extern crate alloc;

/// WebAssembly page size: 64 KiB per the Wasm specification.
pub const PAGE_SIZE: usize = 65536;

mod memory;
pub use memory::{GuestMemory, LinearMemory};

mod iovec;
pub use iovec::{IoVec, IoVecs};

pub mod syscalls;
pub use syscalls::{CapturedOutput, Channel, Errno, GuestExit, HostCall, OutputSink};

/// Faults raised by the memory bridge. Accessors never panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFault {
    /// `offset + len` lies past the end of linear memory (or overflows).
    OutOfBounds { offset: u32, len: u32, size: usize },
}

impl core::fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfBounds { offset, len, size } => write!(
                f,
                "guest memory access out of bounds: offset {offset} + len {len} > size {size}"
            ),
        }
    }
}

/// Result type for memory-bridge operations.
pub type MemResult<T> = Result<T, MemoryFault>;
