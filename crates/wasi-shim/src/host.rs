//! Host side of the import namespace.
//!
//! Each WASI host call is a `wasmi` host function that borrows the guest's
//! linear memory through [`GuestMemory`] and forwards to the pure handler in
//! [`wasi_shim_runtime::syscalls`]. Memory faults become host traps; a guest
//! exit is recorded in [`GuestState`] and unwinds the interpreter with an
//! `i32` exit error.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use wasi_shim_runtime::syscalls::{self, Channel, Errno, GuestExit, HostCall, WASI_MODULE};
use wasi_shim_runtime::{CapturedOutput, GuestMemory, MemResult, MemoryFault, OutputSink};
use wasmi::{Caller, Extern, Linker, Memory};

use crate::error::LinkError;
use crate::link::{LinkPlan, SeekShape};

/// Per-instance host state, owned by the interpreter store.
pub struct GuestState {
    sink: Box<dyn OutputSink>,
    pub(crate) memory: Option<Memory>,
    pub(crate) exit: Option<GuestExit>,
}

impl GuestState {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        Self {
            sink,
            memory: None,
            exit: None,
        }
    }

    /// Output channels the guest writes to.
    pub fn sink(&mut self) -> &mut dyn OutputSink {
        &mut *self.sink
    }

    /// The guest's linear memory, once the loader has established it.
    pub fn memory(&self) -> Option<Memory> {
        self.memory
    }

    /// Exit requested by the guest, if any.
    pub fn exit(&self) -> Option<GuestExit> {
        self.exit
    }
}

impl fmt::Debug for GuestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestState")
            .field("memory", &self.memory)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

/// Failure raised from inside a host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFault {
    Memory(MemoryFault),
    /// The guest has neither imported nor exported a linear memory.
    NoMemory,
}

impl fmt::Display for HostFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostFault::Memory(fault) => write!(f, "{fault}"),
            HostFault::NoMemory => f.write_str("guest has no linear memory"),
        }
    }
}

impl wasmi::core::HostError for HostFault {}

fn guest_memory(caller: &Caller<'_, GuestState>) -> Result<Memory, wasmi::Error> {
    caller
        .data()
        .memory
        .or_else(|| caller.get_export("memory").and_then(Extern::into_memory))
        .ok_or_else(|| wasmi::Error::host(HostFault::NoMemory))
}

/// Run `f` over the guest's memory and host state at once.
fn with_memory<R>(
    caller: &mut Caller<'_, GuestState>,
    f: impl FnOnce(&mut GuestMemory<'_>, &mut GuestState) -> MemResult<R>,
) -> Result<R, wasmi::Error> {
    let memory = guest_memory(caller)?;
    let (bytes, state) = memory.data_and_store_mut(&mut *caller);
    let mut view = GuestMemory::new(bytes);
    f(&mut view, state).map_err(|fault| wasmi::Error::host(HostFault::Memory(fault)))
}

fn fd_write(
    mut caller: Caller<'_, GuestState>,
    fd: u32,
    iovs: u32,
    iovs_len: u32,
    nwritten: u32,
) -> Result<i32, wasmi::Error> {
    with_memory(&mut caller, |memory, state| {
        syscalls::fd_write(memory, state.sink(), fd, iovs, iovs_len, nwritten)
    })
    .map(Errno::code)
}

fn fd_seek(
    mut caller: Caller<'_, GuestState>,
    fd: u32,
    offset: i64,
    whence: u32,
    newoffset: u32,
) -> Result<i32, wasmi::Error> {
    with_memory(&mut caller, |memory, _| {
        syscalls::fd_seek(memory, fd, offset, whence, newoffset)
    })
    .map(Errno::code)
}

fn fd_seek_legalized(
    caller: Caller<'_, GuestState>,
    fd: u32,
    offset_low: i32,
    offset_high: i32,
    whence: u32,
    newoffset: u32,
) -> Result<i32, wasmi::Error> {
    let offset = syscalls::join_i64(offset_low, offset_high);
    fd_seek(caller, fd, offset, whence, newoffset)
}

fn fd_close(_caller: Caller<'_, GuestState>, fd: u32) -> i32 {
    syscalls::fd_close(fd).code()
}

fn fd_fdstat_get(_caller: Caller<'_, GuestState>, fd: u32, stat: u32) -> i32 {
    syscalls::fd_fdstat_get(fd, stat).code()
}

fn proc_exit(mut caller: Caller<'_, GuestState>, code: i32) -> Result<(), wasmi::Error> {
    let exit = syscalls::proc_exit(code);
    caller.data_mut().exit = Some(exit);
    Err(wasmi::Error::i32_exit(exit.code))
}

fn environ_sizes_get(_caller: Caller<'_, GuestState>, count: u32, buf_size: u32) -> i32 {
    syscalls::environ_sizes_get(count, buf_size).code()
}

fn environ_get(_caller: Caller<'_, GuestState>, environ: u32, buf: u32) -> i32 {
    syscalls::environ_get(environ, buf).code()
}

/// Define the host calls the guest imports under `wasi_snapshot_preview1`.
///
/// `fd_seek` is defined with the shape the guest declared; the others have
/// a single shape.
pub fn bind_host_calls(
    linker: &mut Linker<GuestState>,
    plan: &LinkPlan,
) -> Result<(), LinkError> {
    for &call in &plan.host_calls {
        let name = call.name();
        let bound = match call {
            HostCall::FdWrite => linker.func_wrap(WASI_MODULE, name, fd_write),
            HostCall::FdSeek => match plan.seek_shape {
                SeekShape::Native => linker.func_wrap(WASI_MODULE, name, fd_seek),
                SeekShape::Legalized => linker.func_wrap(WASI_MODULE, name, fd_seek_legalized),
            },
            HostCall::FdClose => linker.func_wrap(WASI_MODULE, name, fd_close),
            HostCall::FdFdstatGet => linker.func_wrap(WASI_MODULE, name, fd_fdstat_get),
            HostCall::ProcExit => linker.func_wrap(WASI_MODULE, name, proc_exit),
            HostCall::EnvironSizesGet => linker.func_wrap(WASI_MODULE, name, environ_sizes_get),
            HostCall::EnvironGet => linker.func_wrap(WASI_MODULE, name, environ_get),
        };
        bound.map_err(|err| {
            LinkError::Instantiate(format!("defining {WASI_MODULE}.{name}: {err}"))
        })?;
    }
    Ok(())
}

// ── Sinks ─────────────────────────────────────────────────────────────

/// Writes guest output to the process's stdout and stderr, verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write(&mut self, channel: Channel, text: &str) {
        let result = match channel {
            Channel::Stdout => std::io::stdout().lock().write_all(text.as_bytes()),
            Channel::Stderr => std::io::stderr().lock().write_all(text.as_bytes()),
        };
        if let Err(err) = result {
            log::warn!("dropping guest output: {err}");
        }
    }
}

/// Routes stdout chunks to `log::info!` and stderr chunks to `log::warn!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn write(&mut self, channel: Channel, text: &str) {
        let text = text.strip_suffix('\n').unwrap_or(text);
        match channel {
            Channel::Stdout => log::info!(target: "guest", "{text}"),
            Channel::Stderr => log::warn!(target: "guest", "{text}"),
        }
    }
}

/// A [`CapturedOutput`] that stays readable while an instance owns a clone.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Rc<RefCell<CapturedOutput>>);

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> CapturedOutput {
        self.0.borrow().clone()
    }

    pub fn stdout_text(&self) -> String {
        self.0.borrow().stdout_text()
    }

    pub fn stderr_text(&self) -> String {
        self.0.borrow().stderr_text()
    }

    pub fn clear(&self) {
        *self.0.borrow_mut() = CapturedOutput::new();
    }
}

impl OutputSink for SharedOutput {
    fn write(&mut self, channel: Channel, text: &str) {
        self.0.borrow_mut().write(channel, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, Once};

    /// Records every `guest`-target log line as (level, message).
    struct GuestLogger;

    static GUEST_RECORDS: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();

    impl log::Log for GuestLogger {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.target() == "guest"
        }

        fn log(&self, record: &log::Record<'_>) {
            if self.enabled(record.metadata()) {
                GUEST_RECORDS
                    .lock()
                    .unwrap()
                    .push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    #[test]
    fn log_sink_routes_by_channel_and_trims_one_newline() {
        INSTALL.call_once(|| {
            log::set_boxed_logger(Box::new(GuestLogger)).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
        });

        let mut sink = LogSink;
        sink.write(Channel::Stdout, "a\n");
        sink.write(Channel::Stderr, "a\n\n");
        sink.write(Channel::Stdout, "no newline");

        let records = GUEST_RECORDS.lock().unwrap().clone();
        assert_eq!(
            records,
            vec![
                (log::Level::Info, "a".to_string()),
                (log::Level::Warn, "a\n".to_string()),
                (log::Level::Info, "no newline".to_string()),
            ]
        );
    }

    #[test]
    fn console_sink_accepts_both_channels() {
        let mut sink = ConsoleSink;
        sink.write(Channel::Stdout, "");
        sink.write(Channel::Stderr, "");
    }

    #[test]
    fn shared_output_is_visible_through_clones() {
        let shared = SharedOutput::new();
        let mut handle = shared.clone();
        handle.write(Channel::Stdout, "hi");
        handle.write(Channel::Stderr, "oops");

        assert_eq!(shared.stdout_text(), "hi");
        assert_eq!(shared.stderr_text(), "oops");

        shared.clear();
        assert!(shared.snapshot().is_empty());
    }

    #[test]
    fn guest_state_records_exit() {
        let mut state = GuestState::new(Box::new(CapturedOutput::new()));
        assert_eq!(state.exit(), None);
        state.exit = Some(GuestExit { code: 4 });
        assert_eq!(state.exit(), Some(GuestExit { code: 4 }));
    }

    #[test]
    fn host_fault_display() {
        let fault = HostFault::Memory(MemoryFault::OutOfBounds {
            offset: 65534,
            len: 4,
            size: 65536,
        });
        assert!(fault.to_string().contains("65534"));
        assert_eq!(HostFault::NoMemory.to_string(), "guest has no linear memory");
    }

    #[test]
    fn binds_every_host_call_in_both_seek_shapes() {
        for seek_shape in [SeekShape::Native, SeekShape::Legalized] {
            let engine = wasmi::Engine::default();
            let mut linker = Linker::<GuestState>::new(&engine);
            let plan = LinkPlan {
                host_calls: HostCall::ALL.to_vec(),
                seek_shape,
                ..LinkPlan::default()
            };
            bind_host_calls(&mut linker, &plan).unwrap();
        }
    }

    #[test]
    fn binds_only_imported_host_calls() {
        let engine = wasmi::Engine::default();
        let mut linker = Linker::<GuestState>::new(&engine);
        let plan = LinkPlan {
            host_calls: vec![HostCall::FdWrite],
            ..LinkPlan::default()
        };
        bind_host_calls(&mut linker, &plan).unwrap();

        // fd_write is taken; fd_close was never defined.
        assert!(linker.func_wrap(WASI_MODULE, "fd_write", fd_write).is_err());
        assert!(linker.func_wrap(WASI_MODULE, "fd_close", fd_close).is_ok());
    }
}
