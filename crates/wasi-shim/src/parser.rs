//! WebAssembly module scanner.
//!
//! Wraps the `wasmparser` crate to extract what the loader needs before
//! instantiation: the import list (with resolved function types), function
//! exports, and the module's own memory declaration. Function bodies are
//! skipped; the interpreter validates them when it compiles the module.

use anyhow::{Context, Result};
use std::fmt;
use wasmparser::{ExternalKind, FuncType, Parser, Payload, TypeRef, ValType};

/// Memory limits declared by the module or by a memory import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Initial size in pages (64 KiB each)
    pub initial_pages: u32,

    /// Maximum size in pages (None = unlimited, up to implementation limit)
    pub maximum_pages: Option<u32>,
}

/// A function type, detached from the module's type section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSig {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl From<&FuncType> for FuncSig {
    fn from(ty: &FuncType) -> Self {
        Self {
            params: ty.params().to_vec(),
            results: ty.results().to_vec(),
        }
    }
}

impl fmt::Display for FuncSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |tys: &[ValType]| {
            tys.iter()
                .map(|ty| val_type_name(*ty))
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// Wasm text-format name of a value type.
pub fn val_type_name(ty: ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        ValType::Ref(_) => "ref",
    }
}

/// An import from the Wasm module.
#[derive(Debug, Clone)]
pub struct ImportInfo {
    /// The import module name (e.g., "wasi_snapshot_preview1").
    pub module_name: String,
    /// The import field name (e.g., "fd_write").
    pub name: String,
    /// What kind of item is imported.
    pub kind: ImportKind,
}

/// Kind of import.
#[derive(Debug, Clone)]
pub enum ImportKind {
    /// Imported function with its resolved type.
    Function(FuncSig),
    /// Imported memory.
    Memory(MemoryInfo),
    /// Imported global.
    Global,
    /// Imported table.
    Table,
    /// Anything newer (tags, ...).
    Other,
}

impl ImportKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ImportKind::Function(_) => "function",
            ImportKind::Memory(_) => "memory",
            ImportKind::Global => "global",
            ImportKind::Table => "table",
            ImportKind::Other => "other",
        }
    }
}

/// Scanned WebAssembly module.
#[derive(Debug, Clone, Default)]
pub struct ParsedModule {
    /// Imports, in declaration order.
    pub imports: Vec<ImportInfo>,

    /// Names of exported functions, in declaration order.
    pub func_exports: Vec<String>,

    /// Whether the module exports a memory named "memory".
    pub exports_memory: bool,

    /// The module's own memory (Wasm MVP has at most one, index 0).
    pub memory: Option<MemoryInfo>,
}

impl ParsedModule {
    /// Whether the module exports a function called `name`.
    pub fn exports_func(&self, name: &str) -> bool {
        self.func_exports.iter().any(|e| e == name)
    }

    /// The memory import, if the guest expects the host to supply memory.
    pub fn memory_import(&self) -> Option<(&ImportInfo, MemoryInfo)> {
        self.imports.iter().find_map(|imp| match imp.kind {
            ImportKind::Memory(info) => Some((imp, info)),
            _ => None,
        })
    }
}

/// Scan a WebAssembly binary for its imports, exports and memory.
pub fn parse_wasm(wasm_bytes: &[u8]) -> Result<ParsedModule> {
    let parser = Parser::new(0);

    let mut types: Vec<FuncType> = Vec::new();
    let mut module = ParsedModule::default();

    for payload in parser.parse_all(wasm_bytes) {
        let payload = payload.context("parsing wasm payload")?;

        match payload {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    let rec_group = rec_group.context("reading rec group")?;
                    for sub_type in rec_group.types() {
                        match &sub_type.composite_type.inner {
                            wasmparser::CompositeInnerType::Func(func_ty) => {
                                types.push(func_ty.clone());
                            }
                            _ => {
                                // GC proposal types; a placeholder keeps the
                                // indices of later function types aligned.
                                types.push(FuncType::new([], []));
                            }
                        }
                    }
                }
            }

            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.context("reading import")?;
                    let kind = match import.ty {
                        TypeRef::Func(type_idx) => {
                            let ty = types.get(type_idx as usize).with_context(|| {
                                format!(
                                    "import '{}.{}' references missing type {}",
                                    import.module, import.name, type_idx
                                )
                            })?;
                            ImportKind::Function(FuncSig::from(ty))
                        }
                        TypeRef::Memory(mem_ty) => ImportKind::Memory(MemoryInfo {
                            initial_pages: mem_ty.initial as u32,
                            maximum_pages: mem_ty.maximum.map(|m| m as u32),
                        }),
                        TypeRef::Global(_) => ImportKind::Global,
                        TypeRef::Table(_) => ImportKind::Table,
                        _ => ImportKind::Other,
                    };
                    module.imports.push(ImportInfo {
                        module_name: import.module.to_string(),
                        name: import.name.to_string(),
                        kind,
                    });
                }
            }

            Payload::MemorySection(reader) => {
                if let Some(mem) = reader.into_iter().next() {
                    let memory_type = mem.context("reading memory type")?;
                    module.memory = Some(MemoryInfo {
                        initial_pages: memory_type.initial as u32,
                        maximum_pages: memory_type.maximum.map(|m| m as u32),
                    });
                }
            }

            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.context("reading export")?;
                    match export.kind {
                        ExternalKind::Func => module.func_exports.push(export.name.to_string()),
                        ExternalKind::Memory if export.name == "memory" => {
                            module.exports_memory = true;
                        }
                        _ => {}
                    }
                }
            }

            _ => {}
        }
    }

    Ok(module)
}
