//! The WASI `wasi_snapshot_preview1` subset emulated for guests.
//!
//! Every handler is a plain function of its arguments and a [`GuestMemory`]
//! view: it reads guest pointers through the bridge, performs its effect on
//! an [`OutputSink`], writes results back, and returns an [`Errno`]. Nothing
//! here knows about the interpreter; the loader binds these handlers into
//! the import namespace through the [`HostCall`] table.
//!
//! No emulated call models failure: the only errno ever returned is
//! [`Errno::Success`]. Memory faults are not errnos, they trap the guest.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::iovec::IoVecs;
use crate::memory::GuestMemory;
use crate::MemResult;

/// Import module name the host calls are bound under.
pub const WASI_MODULE: &str = "wasi_snapshot_preview1";

/// WASI errno returned to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Errno {
    Success = 0,
}

impl Errno {
    /// The `i32` the guest sees as the call's return value.
    pub fn code(self) -> i32 {
        self as u16 as i32
    }
}

/// Wasm value kinds appearing in host-call signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValKind {
    I32,
    I64,
}

/// A host-call function type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [ValKind],
    pub results: &'static [ValKind],
}

use ValKind::{I32, I64};

const FD_WRITE_SIG: Signature = Signature {
    params: &[I32, I32, I32, I32],
    results: &[I32],
};
/// `fd_seek` as declared by a clang/wasi-libc guest.
const FD_SEEK_SIG: Signature = Signature {
    params: &[I32, I64, I32, I32],
    results: &[I32],
};
/// `fd_seek` with the 64-bit offset legalized into low/high `i32` halves,
/// as emitted by Emscripten for hosts without BigInt support.
const FD_SEEK_LEGALIZED_SIG: Signature = Signature {
    params: &[I32, I32, I32, I32, I32],
    results: &[I32],
};
const FD_CLOSE_SIG: Signature = Signature {
    params: &[I32],
    results: &[I32],
};
const TWO_PTR_SIG: Signature = Signature {
    params: &[I32, I32],
    results: &[I32],
};
const PROC_EXIT_SIG: Signature = Signature {
    params: &[I32],
    results: &[],
};

/// The fixed Host Call Table.
///
/// Any import from [`WASI_MODULE`] whose name is not listed here is a link
/// error at load time; there are no fallback stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCall {
    FdWrite,
    FdSeek,
    FdClose,
    FdFdstatGet,
    ProcExit,
    EnvironSizesGet,
    EnvironGet,
}

impl HostCall {
    /// Every entry of the table, in declaration order.
    pub const ALL: [HostCall; 7] = [
        HostCall::FdWrite,
        HostCall::FdSeek,
        HostCall::FdClose,
        HostCall::FdFdstatGet,
        HostCall::ProcExit,
        HostCall::EnvironSizesGet,
        HostCall::EnvironGet,
    ];

    /// Import field name.
    pub fn name(self) -> &'static str {
        match self {
            HostCall::FdWrite => "fd_write",
            HostCall::FdSeek => "fd_seek",
            HostCall::FdClose => "fd_close",
            HostCall::FdFdstatGet => "fd_fdstat_get",
            HostCall::ProcExit => "proc_exit",
            HostCall::EnvironSizesGet => "environ_sizes_get",
            HostCall::EnvironGet => "environ_get",
        }
    }

    /// Look up a table entry by import field name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|call| call.name() == name)
    }

    /// Accepted signatures. The first one is the canonical shape.
    pub fn signatures(self) -> &'static [Signature] {
        match self {
            HostCall::FdWrite => &[FD_WRITE_SIG],
            HostCall::FdSeek => &[FD_SEEK_SIG, FD_SEEK_LEGALIZED_SIG],
            HostCall::FdClose => &[FD_CLOSE_SIG],
            HostCall::FdFdstatGet | HostCall::EnvironSizesGet | HostCall::EnvironGet => {
                &[TWO_PTR_SIG]
            }
            HostCall::ProcExit => &[PROC_EXIT_SIG],
        }
    }

    /// Whether `sig` is one of the shapes this call can be bound with.
    pub fn accepts(self, sig: &Signature) -> bool {
        self.signatures().contains(sig)
    }
}

impl core::fmt::Display for HostCall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Host output channel selected by descriptor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    /// fd 1 → stdout, fd 2 → stderr, anything else has no channel.
    pub fn from_fd(fd: u32) -> Option<Self> {
        match fd {
            1 => Some(Channel::Stdout),
            2 => Some(Channel::Stderr),
            _ => None,
        }
    }
}

/// Receives decoded text chunks from `fd_write`.
pub trait OutputSink {
    fn write(&mut self, channel: Channel, text: &str);
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn write(&mut self, channel: Channel, text: &str) {
        (**self).write(channel, text)
    }
}

impl<S: OutputSink + ?Sized> OutputSink for alloc::boxed::Box<S> {
    fn write(&mut self, channel: Channel, text: &str) {
        (**self).write(channel, text)
    }
}

/// Sink that keeps every chunk in memory, per channel, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to stdout, concatenated.
    pub fn stdout_text(&self) -> String {
        self.stdout.concat()
    }

    /// Everything written to stderr, concatenated.
    pub fn stderr_text(&self) -> String {
        self.stderr.concat()
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

impl OutputSink for CapturedOutput {
    fn write(&mut self, channel: Channel, text: &str) {
        match channel {
            Channel::Stdout => self.stdout.push(text.to_string()),
            Channel::Stderr => self.stderr.push(text.to_string()),
        }
    }
}

/// Guest-requested termination, raised by `proc_exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestExit {
    pub code: i32,
}

impl core::fmt::Display for GuestExit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "guest exited with code {}", self.code)
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

/// `fd_write(fd, iovs, iovs_len, nwritten) -> errno`
///
/// Every iovec's length counts toward `*nwritten`, including chunks that
/// are suppressed (a bare `"\n"`) or dropped (fd other than 1 or 2).
pub fn fd_write(
    memory: &mut GuestMemory<'_>,
    sink: &mut dyn OutputSink,
    fd: u32,
    iovs: u32,
    iovs_len: u32,
    nwritten: u32,
) -> MemResult<Errno> {
    let channel = Channel::from_fd(fd);
    let mut written: u32 = 0;

    for iov in IoVecs::new(memory, iovs, iovs_len) {
        let iov = iov?;
        let text = memory.read_text(iov.offset, iov.len)?;
        written = written.wrapping_add(iov.len);
        if text.is_empty() || text == "\n" {
            continue;
        }
        match channel {
            Some(channel) => sink.write(channel, &text),
            None => log::trace!("fd_write: dropping {} bytes for fd {fd}", iov.len),
        }
    }

    log::trace!("fd_write(fd={fd}, iovs={iovs:#x}, iovs_len={iovs_len}) -> {written} bytes");
    memory.write_u32(nwritten, written)?;
    Ok(Errno::Success)
}

/// `fd_seek(fd, offset, whence, newoffset) -> errno`
///
/// There is no seekable stream behind any descriptor: the reported new
/// position is always zero.
pub fn fd_seek(
    memory: &mut GuestMemory<'_>,
    fd: u32,
    offset: i64,
    whence: u32,
    newoffset: u32,
) -> MemResult<Errno> {
    log::trace!("fd_seek(fd={fd}, offset={offset}, whence={whence}) -> 0");
    memory.write_u64(newoffset, 0)?;
    Ok(Errno::Success)
}

/// `fd_close(fd) -> errno`
pub fn fd_close(fd: u32) -> Errno {
    log::trace!("fd_close(fd={fd})");
    Errno::Success
}

/// `fd_fdstat_get(fd, stat) -> errno`
///
/// The stat structure is left untouched.
pub fn fd_fdstat_get(fd: u32, stat: u32) -> Errno {
    log::trace!("fd_fdstat_get(fd={fd}, stat={stat:#x})");
    Errno::Success
}

/// `proc_exit(code)`: never returns to the guest.
pub fn proc_exit(code: i32) -> GuestExit {
    log::trace!("proc_exit({code})");
    GuestExit { code }
}

/// `environ_sizes_get(count, buf_size) -> errno`. Outputs are left untouched.
pub fn environ_sizes_get(count: u32, buf_size: u32) -> Errno {
    log::trace!("environ_sizes_get(count={count:#x}, buf_size={buf_size:#x})");
    Errno::Success
}

/// `environ_get(environ, buf) -> errno`
pub fn environ_get(environ: u32, buf: u32) -> Errno {
    log::trace!("environ_get(environ={environ:#x}, buf={buf:#x})");
    Errno::Success
}

/// Reassemble a legalized 64-bit argument from its `i32` halves.
pub fn join_i64(low: i32, high: i32) -> i64 {
    (((high as u32 as u64) << 32) | low as u32 as u64) as i64
}
