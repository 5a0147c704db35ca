//! wasi-shim: load a WebAssembly guest against a fixed WASI subset.
//!
//! The guest's `wasi_snapshot_preview1` imports are served by the handlers in
//! [`wasi_shim_runtime`]; anything else must be registered by the embedder
//! under the extension namespace (`env` by default).
//!
//! ```no_run
//! use futures::executor::block_on;
//! use wasi_shim::{FsFetcher, ModuleLoader};
//!
//! let mut loader = ModuleLoader::new(FsFetcher::new());
//! loader.func_wrap("lcdUpdate", |_frame: u32| {});
//! let mut guest = block_on(loader.load("guest.wasm", 16)).unwrap();
//! guest.call_i32("main", &[]).unwrap();
//! ```

pub mod error;
pub mod fetch;
pub mod host;
pub mod instance;
pub mod link;
pub mod loader;
pub mod parser;

pub use error::{FetchError, InvokeError, LinkError, LoadError};
pub use fetch::{FsFetcher, ModuleFetcher, StaticFetcher};
pub use host::{ConsoleSink, GuestState, LogSink, SharedOutput};
pub use instance::GuestInstance;
pub use loader::{LoadState, ModuleLoader};
pub use wasi_shim_runtime::{CapturedOutput, Channel, GuestMemory, OutputSink};
pub use wasmi::Val;

/// Configuration for a [`ModuleLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Pages allocated for a guest that imports its memory
    pub memory_pages: u32,
    /// Import module name for extension functions and `memory`
    pub extension_module: String,
    /// Export run once after instantiation
    pub ctors_export: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            memory_pages: 256,
            extension_module: "env".to_string(),
            ctors_export: "__wasm_call_ctors".to_string(),
        }
    }
}

/// Load the guest at `path` with default options and console output.
pub async fn load_file(path: &str, pages: u32) -> Result<GuestInstance, LoadError> {
    ModuleLoader::new(FsFetcher::new()).load(path, pages).await
}
