//! Module loader integration tests: linking, memory, static initialization.

use anyhow::{Context, Result};
use futures::executor::block_on;
use wasi_shim::{
    Channel, FetchError, FsFetcher, GuestState, InvokeError, LinkError, LoadError, LoadOptions,
    LoadState, ModuleLoader, SharedOutput, StaticFetcher,
};
use wasmi::Caller;

fn loader_for(wat_source: &str) -> Result<(ModuleLoader<StaticFetcher>, SharedOutput)> {
    let wasm_bytes = wat::parse_str(wat_source).context("failed to parse WAT")?;
    let mut fetcher = StaticFetcher::new();
    fetcher.insert("guest.wasm", wasm_bytes);

    let output = SharedOutput::new();
    let mut loader = ModuleLoader::new(fetcher);
    loader.set_output(output.clone());
    Ok((loader, output))
}

/// A guest whose constructors bump a counter and print "init".
const CTORS_GUEST: &str = r#"
    (module
        (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (global $inits (mut i32) (i32.const 0))
        (data (i32.const 0) "\00\01\00\00\04\00\00\00")
        (data (i32.const 0x100) "init")
        (func (export "__wasm_call_ctors")
            global.get $inits
            i32.const 1
            i32.add
            global.set $inits
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 0x40))))
        (func (export "main") (result i32)
            global.get $inits)
    )
"#;

#[test]
fn test_ctors_run_exactly_once_before_entry() -> Result<()> {
    let (mut loader, output) = loader_for(CTORS_GUEST)?;

    let mut guest = block_on(loader.load("guest.wasm", 1))?;
    assert_eq!(loader.state(), LoadState::Ready);
    assert_eq!(output.snapshot().stdout, ["init"]);

    assert_eq!(guest.call_i32("main", &[])?, Some(1));
    assert_eq!(guest.call_i32("main", &[])?, Some(1));
    assert_eq!(output.snapshot().stdout, ["init"]);
    Ok(())
}

#[test]
fn test_custom_ctors_export_name() -> Result<()> {
    let wat = r#"
        (module
            (global $ready (mut i32) (i32.const 0))
            (func (export "_initialize") i32.const 1 global.set $ready)
            (func (export "main") (result i32) global.get $ready)
        )
    "#;
    let mut fetcher = StaticFetcher::new();
    fetcher.insert("guest.wasm", wat::parse_str(wat)?);
    let options = LoadOptions {
        ctors_export: "_initialize".to_string(),
        ..LoadOptions::default()
    };
    let mut loader = ModuleLoader::with_options(fetcher, options);

    let mut guest = block_on(loader.load("guest.wasm", 1))?;
    assert_eq!(guest.call_i32("main", &[])?, Some(1));
    Ok(())
}

#[test]
fn test_missing_ctors_export_is_accepted() -> Result<()> {
    let (mut loader, _) = loader_for(r#"(module (func (export "main") (result i32) i32.const 5))"#)?;

    let mut guest = block_on(loader.load("guest.wasm", 1))?;
    assert_eq!(guest.exports(), ["main"]);
    assert_eq!(guest.call_i32("main", &[])?, Some(5));
    Ok(())
}

#[test]
fn test_exit_during_ctors_fails_load() -> Result<()> {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (func (export "__wasm_call_ctors") i32.const 1 call $exit)
        )
    "#;
    let (mut loader, _) = loader_for(wat)?;

    match block_on(loader.load("guest.wasm", 1)) {
        Err(LoadError::Init(InvokeError::Exit { code })) => assert_eq!(code, 1),
        Err(err) => panic!("expected init exit, got {err:?}"),
        Ok(_) => panic!("load unexpectedly succeeded"),
    }
    assert_eq!(loader.state(), LoadState::Unloaded);
    Ok(())
}

#[test]
fn test_unknown_wasi_import_is_link_error() -> Result<()> {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "random_get"
                (func (param i32 i32) (result i32)))
        )
    "#;
    let (mut loader, _) = loader_for(wat)?;

    match block_on(loader.load("guest.wasm", 1)) {
        Err(LoadError::Link(LinkError::UnresolvedImport { module, name })) => {
            assert_eq!(module, "wasi_snapshot_preview1");
            assert_eq!(name, "random_get");
        }
        Err(err) => panic!("expected unresolved import, got {err:?}"),
        Ok(_) => panic!("load unexpectedly succeeded"),
    }
    assert_eq!(loader.state(), LoadState::Unloaded);
    Ok(())
}

#[test]
fn test_wasi_signature_mismatch_is_link_error() -> Result<()> {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32) (result i32)))
        )
    "#;
    let (mut loader, _) = loader_for(wat)?;

    let err = block_on(loader.load("guest.wasm", 1)).err().context("load should fail")?;
    assert!(matches!(
        err,
        LoadError::Link(LinkError::SignatureMismatch { ref name, .. }) if name == "fd_write"
    ));
    Ok(())
}

#[test]
fn test_malformed_binary_is_link_error() -> Result<()> {
    let mut fetcher = StaticFetcher::new();
    fetcher.insert("guest.wasm", b"not a wasm module".to_vec());
    let mut loader = ModuleLoader::new(fetcher);

    let err = block_on(loader.load("guest.wasm", 1)).err().context("load should fail")?;
    assert!(matches!(err, LoadError::Link(LinkError::Malformed(_))));
    assert_eq!(loader.state(), LoadState::Unloaded);
    Ok(())
}

#[test]
fn test_unknown_locator_is_fetch_error() {
    let mut loader = ModuleLoader::new(StaticFetcher::new());
    let err = block_on(loader.load("nowhere.wasm", 1)).err();
    assert!(matches!(
        err,
        Some(LoadError::Fetch(FetchError::NotFound { .. }))
    ));
}

#[test]
fn test_load_from_filesystem() -> Result<()> {
    let dir = std::env::temp_dir();
    let name = format!("wasi-shim-loader-{}.wasm", std::process::id());
    std::fs::write(
        dir.join(&name),
        wat::parse_str(r#"(module (func (export "main") (result i32) i32.const 11))"#)?,
    )?;

    let mut loader = ModuleLoader::new(FsFetcher::with_root(&dir));
    let mut guest = block_on(loader.load(&name, 1))?;
    assert_eq!(guest.call_i32("main", &[])?, Some(11));

    std::fs::remove_file(dir.join(&name))?;
    Ok(())
}

#[test]
fn test_unregistered_extension_is_link_error() -> Result<()> {
    let wat = r#"
        (module
            (import "env" "lcdUpdate" (func (param i32)))
        )
    "#;
    let (mut loader, _) = loader_for(wat)?;

    let err = block_on(loader.load("guest.wasm", 1)).err().context("load should fail")?;
    assert!(matches!(
        err,
        LoadError::Link(LinkError::UnresolvedImport { ref name, .. }) if name == "lcdUpdate"
    ));
    Ok(())
}

#[test]
fn test_registered_extension_is_callable() -> Result<()> {
    let wat = r#"
        (module
            (import "env" "jsPrint" (func $print (param i32)))
            (memory (export "memory") 1)
            (func (export "main")
                i32.const 42
                call $print)
        )
    "#;
    let (mut loader, output) = loader_for(wat)?;
    loader.func_wrap("jsPrint", |mut caller: Caller<'_, GuestState>, value: i32| {
        caller
            .data_mut()
            .sink()
            .write(Channel::Stdout, &format!("value={value}"));
    });

    let mut guest = block_on(loader.load("guest.wasm", 1))?;
    guest.call("main", &[])?;

    assert_eq!(output.stdout_text(), "value=42");
    Ok(())
}

#[test]
fn test_imported_memory_is_sized_by_request() -> Result<()> {
    let wat = r#"
        (module
            (import "env" "memory" (memory 1))
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (data (i32.const 0) "\00\01\00\00\02\00\00\00")
            (data (i32.const 0x100) "ok")
            (func (export "pages") (result i32) memory.size)
            (func (export "main") (result i32)
                (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 0x40)))
        )
    "#;
    let (mut loader, output) = loader_for(wat)?;

    let mut guest = block_on(loader.load("guest.wasm", 4))?;
    assert_eq!(guest.call_i32("pages", &[])?, Some(4));
    assert_eq!(guest.memory().map(<[u8]>::len), Some(4 * 65536));

    // Host calls reach an imported memory the guest does not export.
    assert_eq!(guest.call_i32("main", &[])?, Some(0));
    assert_eq!(output.stdout_text(), "ok");
    Ok(())
}

#[test]
fn test_imported_memory_too_large_for_guest_maximum() -> Result<()> {
    let (mut loader, _) = loader_for(r#"(module (import "env" "memory" (memory 1 2)))"#)?;

    let err = block_on(loader.load("guest.wasm", 4)).err().context("load should fail")?;
    assert!(matches!(err, LoadError::Link(LinkError::Instantiate(_))));
    assert_eq!(loader.state(), LoadState::Unloaded);
    Ok(())
}

#[test]
fn test_loader_is_reusable_after_failure() -> Result<()> {
    let mut fetcher = StaticFetcher::new();
    fetcher.insert("good.wasm", wat::parse_str("(module)")?);
    fetcher.insert("bad.wasm", b"garbage".to_vec());
    let mut loader = ModuleLoader::new(fetcher);

    assert!(block_on(loader.load("bad.wasm", 1)).is_err());
    assert_eq!(loader.state(), LoadState::Unloaded);

    block_on(loader.load("good.wasm", 1))?;
    assert_eq!(loader.state(), LoadState::Ready);
    Ok(())
}
