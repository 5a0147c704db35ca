//! Error types for loading and invoking guests.

use std::io;

use wasi_shim_runtime::MemoryFault;

/// The binary could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no module registered for locator '{locator}'")]
    NotFound { locator: String },

    #[error("failed to read '{locator}'")]
    Io {
        locator: String,
        #[source]
        source: io::Error,
    },
}

/// The binary is malformed or cannot be linked against the import namespace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("malformed module: {0}")]
    Malformed(String),

    #[error("unresolved import '{module}.{name}'")]
    UnresolvedImport { module: String, name: String },

    #[error("import '{module}.{name}' has type {found}, expected {expected}")]
    SignatureMismatch {
        module: String,
        name: String,
        expected: String,
        found: String,
    },

    #[error("instantiation failed: {0}")]
    Instantiate(String),
}

/// A guest entry-point invocation did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// The guest called `proc_exit(code)` during this invocation.
    #[error("guest exited with code {code}")]
    Exit { code: i32 },

    /// The guest already exited; the instance accepts no further calls.
    #[error("guest already exited with code {code}")]
    Exited { code: i32 },

    #[error("no exported function named '{name}'")]
    MissingExport { name: String },

    /// A host call was handed a pointer outside linear memory.
    #[error("{0}")]
    Fault(MemoryFault),

    #[error("guest trapped: {0}")]
    Trap(String),
}

impl InvokeError {
    /// Exit code if this error is a guest-requested termination.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } | Self::Exited { code } => Some(*code),
            _ => None,
        }
    }
}

/// A load request failed. Every variant is terminal for that attempt.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("fetch failed")]
    Fetch(#[from] FetchError),

    #[error("link failed")]
    Link(#[from] LinkError),

    /// Static initialization did not complete.
    #[error("static initialization failed")]
    Init(#[source] InvokeError),
}
