use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use futures::executor::block_on;
use wasi_shim::{FsFetcher, InvokeError, LoadOptions, ModuleLoader};

/// wasi-shim: run a WebAssembly guest against a minimal WASI subset.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: String,

    /// Memory pages for a guest that imports its memory
    #[arg(long, default_value_t = 256)]
    pages: u32,

    /// Exported function to invoke after initialization
    #[arg(long, default_value = "main")]
    invoke: String,

    /// i32 arguments passed to the invoked function
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    args: Vec<i32>,

    /// Static-initialization export
    #[arg(long, default_value = "__wasm_call_ctors")]
    ctors: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let options = LoadOptions {
        memory_pages: cli.pages,
        ctors_export: cli.ctors.clone(),
        ..LoadOptions::default()
    };
    let mut loader = ModuleLoader::with_options(FsFetcher::new(), options);

    let mut guest = match block_on(loader.load(&cli.input, cli.pages)) {
        Ok(guest) => guest,
        Err(wasi_shim::LoadError::Init(InvokeError::Exit { code })) => std::process::exit(code),
        Err(err) => return Err(err).with_context(|| format!("failed to load {}", cli.input)),
    };

    match guest.call_i32(&cli.invoke, &cli.args) {
        Ok(Some(value)) => println!("{value}"),
        Ok(None) => {}
        Err(InvokeError::Exit { code }) => std::process::exit(code),
        Err(err) => return Err(err).with_context(|| format!("'{}' failed", cli.invoke)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["wasi-shim", "guest.wasm"]);
        assert_eq!(cli.input, "guest.wasm");
        assert_eq!(cli.pages, 256);
        assert_eq!(cli.invoke, "main");
        assert!(cli.args.is_empty());
        assert_eq!(cli.ctors, "__wasm_call_ctors");
    }

    #[test]
    fn cli_parses_invocation() {
        let cli = Cli::parse_from([
            "wasi-shim",
            "guest.wasm",
            "--pages",
            "2",
            "--invoke",
            "add",
            "--args",
            "3",
            "-4",
        ]);
        assert_eq!(cli.pages, 2);
        assert_eq!(cli.invoke, "add");
        assert_eq!(cli.args, vec![3, -4]);
    }
}
