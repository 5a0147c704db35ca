//! Import resolution against the host-call table.
//!
//! Runs over the scanned import list before anything is instantiated so
//! that every unsatisfiable import surfaces as a typed [`LinkError`] naming
//! the offending `module.name` pair.

use std::collections::HashSet;

use wasi_shim_runtime::syscalls::{HostCall, Signature, ValKind, WASI_MODULE};
use wasmparser::ValType;

use crate::error::LinkError;
use crate::parser::{FuncSig, ImportInfo, ImportKind, MemoryInfo, ParsedModule};

/// How the guest declared `fd_seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekShape {
    /// `(fd: i32, offset: i64, whence: i32, newoffset: i32) -> i32`
    #[default]
    Native,
    /// `(fd, offset_low, offset_high, whence, newoffset)`, all `i32`.
    Legalized,
}

/// What the loader has to provide for a guest to instantiate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    /// Host calls the guest imports, in import order.
    pub host_calls: Vec<HostCall>,
    /// Shape to bind `fd_seek` with.
    pub seek_shape: SeekShape,
    /// Set when the guest imports `<extension module>.memory`.
    pub memory_import: Option<MemoryInfo>,
    /// Extension functions the guest imports, in import order.
    pub extensions: Vec<String>,
}

fn val_kind(ty: ValType) -> Option<ValKind> {
    match ty {
        ValType::I32 => Some(ValKind::I32),
        ValType::I64 => Some(ValKind::I64),
        _ => None,
    }
}

/// Whether a guest-declared type is exactly `sig`.
fn sig_matches(found: &FuncSig, sig: &Signature) -> bool {
    let same = |tys: &[ValType], kinds: &[ValKind]| {
        tys.len() == kinds.len()
            && tys
                .iter()
                .zip(kinds)
                .all(|(ty, kind)| val_kind(*ty) == Some(*kind))
    };
    same(&found.params, sig.params) && same(&found.results, sig.results)
}

fn signature_string(sig: &Signature) -> String {
    let join = |kinds: &[ValKind]| {
        kinds
            .iter()
            .map(|k| match k {
                ValKind::I32 => "i32",
                ValKind::I64 => "i64",
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("({}) -> ({})", join(sig.params), join(sig.results))
}

fn unresolved(import: &ImportInfo) -> LinkError {
    LinkError::UnresolvedImport {
        module: import.module_name.clone(),
        name: import.name.clone(),
    }
}

fn resolve_host_call(import: &ImportInfo, plan: &mut LinkPlan) -> Result<(), LinkError> {
    let call = HostCall::from_name(&import.name).ok_or_else(|| unresolved(import))?;
    let ImportKind::Function(found) = &import.kind else {
        return Err(unresolved(import));
    };

    let Some(index) = call.signatures().iter().position(|sig| sig_matches(found, sig)) else {
        let expected = call
            .signatures()
            .iter()
            .map(signature_string)
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(LinkError::SignatureMismatch {
            module: import.module_name.clone(),
            name: import.name.clone(),
            expected,
            found: found.to_string(),
        });
    };

    if call == HostCall::FdSeek && index == 1 {
        plan.seek_shape = SeekShape::Legalized;
    }
    if !plan.host_calls.contains(&call) {
        plan.host_calls.push(call);
    }
    Ok(())
}

/// Check every import of `module` and work out what the host must supply.
///
/// * `wasi_snapshot_preview1` functions must be in the host-call table with
///   one of the accepted signatures.
/// * `<extension_module>.memory` is satisfied by a host-allocated memory.
/// * Other `<extension_module>` functions must be in `extensions`.
///
/// Anything else fails.
pub fn resolve_imports(
    module: &ParsedModule,
    extension_module: &str,
    extensions: &HashSet<String>,
) -> Result<LinkPlan, LinkError> {
    let mut plan = LinkPlan::default();

    for import in &module.imports {
        if import.module_name == WASI_MODULE {
            resolve_host_call(import, &mut plan)?;
            continue;
        }

        if import.module_name != extension_module {
            return Err(unresolved(import));
        }

        match &import.kind {
            ImportKind::Memory(info) if import.name == "memory" => {
                plan.memory_import = Some(*info);
            }
            ImportKind::Function(_) if extensions.contains(&import.name) => {
                plan.extensions.push(import.name.clone());
            }
            _ => return Err(unresolved(import)),
        }
    }

    log::debug!(
        "resolved {} imports: {} host calls, {} extensions, memory import: {}",
        module.imports.len(),
        plan.host_calls.len(),
        plan.extensions.len(),
        plan.memory_import.is_some()
    );
    Ok(plan)
}
