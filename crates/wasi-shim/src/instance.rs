//! A loaded guest.

use std::fmt;

use wasi_shim_runtime::{GuestMemory, OutputSink};
use wasmi::{Instance, Store, Val};

use crate::error::InvokeError;
use crate::host::{GuestState, HostFault};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ready,
    Exited(i32),
}

/// A realized guest module: its store, exports and memory.
///
/// Once the guest calls `proc_exit` the instance is terminated and every
/// later call fails with [`InvokeError::Exited`].
pub struct GuestInstance {
    store: Store<GuestState>,
    instance: Instance,
    exports: Vec<String>,
    status: Status,
}

impl fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestInstance")
            .field("exports", &self.exports)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl GuestInstance {
    pub(crate) fn new(store: Store<GuestState>, instance: Instance, exports: Vec<String>) -> Self {
        Self {
            store,
            instance,
            exports,
            status: Status::Ready,
        }
    }

    /// Names of the guest's exported functions.
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e == name)
    }

    pub fn is_ready(&self) -> bool {
        self.status == Status::Ready
    }

    /// Exit code, once the guest has called `proc_exit`.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            Status::Exited(code) => Some(code),
            Status::Ready => None,
        }
    }

    /// Raw bytes of the guest's linear memory.
    pub fn memory(&self) -> Option<&[u8]> {
        let memory = self.store.data().memory?;
        Some(memory.data(&self.store))
    }

    /// Mutable view of the guest's linear memory.
    pub fn memory_mut(&mut self) -> Option<GuestMemory<'_>> {
        let memory = self.store.data().memory?;
        Some(GuestMemory::new(memory.data_mut(&mut self.store)))
    }

    /// The sink guest output is routed to.
    pub fn output(&mut self) -> &mut dyn OutputSink {
        self.store.data_mut().sink()
    }

    /// Invoke the exported function `name`.
    pub fn call(&mut self, name: &str, args: &[Val]) -> Result<Vec<Val>, InvokeError> {
        if let Status::Exited(code) = self.status {
            return Err(InvokeError::Exited { code });
        }
        let func = self
            .instance
            .get_func(&self.store, name)
            .ok_or_else(|| InvokeError::MissingExport {
                name: name.to_string(),
            })?;

        let mut results: Vec<Val> = func
            .ty(&self.store)
            .results()
            .iter()
            .map(|ty| Val::default(*ty))
            .collect();

        log::trace!("calling '{name}' with {} args", args.len());
        match func.call(&mut self.store, args, &mut results) {
            Ok(()) => Ok(results),
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Invoke `name` with `i32` arguments; returns its first `i32` result.
    pub fn call_i32(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, InvokeError> {
        let args: Vec<Val> = args.iter().copied().map(Val::I32).collect();
        let results = self.call(name, &args)?;
        Ok(results.first().and_then(Val::i32))
    }

    /// Run the static-initialization export, if the guest has one.
    pub(crate) fn run_ctors(&mut self, name: &str) -> Result<(), InvokeError> {
        if !self.has_export(name) {
            log::debug!("no '{name}' export; skipping static initialization");
            return Ok(());
        }
        log::debug!("running '{name}'");
        self.call(name, &[]).map(|_| ())
    }

    fn classify(&mut self, err: wasmi::Error) -> InvokeError {
        let exit = self
            .store
            .data_mut()
            .exit
            .take()
            .map(|exit| exit.code)
            .or_else(|| err.i32_exit_status());
        if let Some(code) = exit {
            log::debug!("guest exited with code {code}");
            self.status = Status::Exited(code);
            return InvokeError::Exit { code };
        }
        if let Some(HostFault::Memory(fault)) = err.downcast_ref::<HostFault>() {
            return InvokeError::Fault(*fault);
        }
        InvokeError::Trap(err.to_string())
    }
}
