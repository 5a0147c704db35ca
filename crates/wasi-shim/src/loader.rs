//! Module loader: fetch, link, instantiate, initialize.

use std::collections::HashSet;
use std::fmt;

use wasi_shim_runtime::OutputSink;
use wasmi::errors::LinkerError;
use wasmi::{Engine, IntoFunc, Linker, Memory, MemoryType, Module, Store};

use crate::error::{LinkError, LoadError};
use crate::fetch::ModuleFetcher;
use crate::host::{self, ConsoleSink, GuestState};
use crate::instance::GuestInstance;
use crate::link::resolve_imports;
use crate::parser::parse_wasm;
use crate::LoadOptions;

/// Loader state, observable between and during loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Fetching,
    Instantiating,
    Ready,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadState::Unloaded => "unloaded",
            LoadState::Fetching => "fetching",
            LoadState::Instantiating => "instantiating",
            LoadState::Ready => "ready",
        };
        f.write_str(name)
    }
}

type Binder = Box<dyn Fn(&mut Linker<GuestState>, &str) -> Result<(), LinkerError>>;
type SinkFactory = Box<dyn Fn() -> Box<dyn OutputSink>>;

/// A caller-supplied host function for the extension namespace.
struct Extension {
    name: String,
    bind: Binder,
}

/// Loads guests from a [`ModuleFetcher`] against the WASI subset plus any
/// registered extension functions.
pub struct ModuleLoader<F> {
    fetcher: F,
    options: LoadOptions,
    engine: Engine,
    state: LoadState,
    extensions: Vec<Extension>,
    sink: SinkFactory,
}

impl<F: ModuleFetcher> ModuleLoader<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_options(fetcher, LoadOptions::default())
    }

    pub fn with_options(fetcher: F, options: LoadOptions) -> Self {
        Self {
            fetcher,
            options,
            engine: Engine::default(),
            state: LoadState::Unloaded,
            extensions: Vec::new(),
            sink: Box::new(|| Box::new(ConsoleSink)),
        }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Route guest output of every subsequently loaded instance to a clone
    /// of `sink`.
    pub fn set_output<S>(&mut self, sink: S) -> &mut Self
    where
        S: OutputSink + Clone + 'static,
    {
        self.sink = Box::new(move || Box::new(sink.clone()));
        self
    }

    /// Register a host function under the extension namespace.
    ///
    /// Registering a name twice replaces the earlier function.
    pub fn func_wrap<Params, Results>(
        &mut self,
        name: impl Into<String>,
        func: impl IntoFunc<GuestState, Params, Results> + Clone,
    ) -> &mut Self
    where
        Params: 'static,
        Results: 'static,
    {
        let name = name.into();
        self.extensions.retain(|ext| ext.name != name);
        let field = name.clone();
        let bind: Binder = Box::new(move |linker, module| {
            linker.func_wrap(module, &field, func.clone()).map(|_| ())
        });
        self.extensions.push(Extension { name, bind });
        self
    }

    fn transition(&mut self, next: LoadState) {
        log::debug!("loader: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Load with the configured default page count.
    pub async fn load_default(&mut self, locator: &str) -> Result<GuestInstance, LoadError> {
        let pages = self.options.memory_pages;
        self.load(locator, pages).await
    }

    /// Fetch, link and instantiate the guest at `locator`, then run its
    /// static constructors once.
    ///
    /// `pages` sizes the memory handed to a guest that imports it. On any
    /// failure the loader is back in [`LoadState::Unloaded`].
    pub async fn load(&mut self, locator: &str, pages: u32) -> Result<GuestInstance, LoadError> {
        match self.try_load(locator, pages).await {
            Ok(instance) => {
                self.transition(LoadState::Ready);
                log::info!("loaded '{locator}'");
                Ok(instance)
            }
            Err(err) => {
                log::debug!("load of '{locator}' failed: {err}");
                self.transition(LoadState::Unloaded);
                Err(err)
            }
        }
    }

    async fn try_load(&mut self, locator: &str, pages: u32) -> Result<GuestInstance, LoadError> {
        self.transition(LoadState::Fetching);
        let bytes = self.fetcher.fetch(locator).await?;

        self.transition(LoadState::Instantiating);
        let mut instance = self.instantiate(&bytes, pages)?;

        instance
            .run_ctors(&self.options.ctors_export)
            .map_err(LoadError::Init)?;
        Ok(instance)
    }

    fn instantiate(&self, bytes: &[u8], pages: u32) -> Result<GuestInstance, LinkError> {
        let parsed = parse_wasm(bytes).map_err(|err| LinkError::Malformed(format!("{err:#}")))?;

        let names: HashSet<String> = self.extensions.iter().map(|e| e.name.clone()).collect();
        let namespace = self.options.extension_module.as_str();
        let plan = resolve_imports(&parsed, namespace, &names)?;

        let module =
            Module::new(&self.engine, bytes).map_err(|err| LinkError::Malformed(err.to_string()))?;
        let mut store = Store::new(&self.engine, GuestState::new((self.sink)()));
        let mut linker = Linker::<GuestState>::new(&self.engine);

        host::bind_host_calls(&mut linker, &plan)?;
        let imported = self
            .extensions
            .iter()
            .filter(|ext| plan.extensions.contains(&ext.name));
        for ext in imported {
            (ext.bind)(&mut linker, namespace).map_err(|err| {
                LinkError::Instantiate(format!("defining {namespace}.{}: {err}", ext.name))
            })?;
        }

        if plan.memory_import.is_some() {
            let memory = allocate_memory(&mut store, pages)?;
            linker
                .define(namespace, "memory", memory)
                .map_err(|err| LinkError::Instantiate(err.to_string()))?;
            store.data_mut().memory = Some(memory);
            log::debug!("bound {namespace}.memory with {pages} pages");
        }

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|err| LinkError::Instantiate(err.to_string()))?
            .start(&mut store)
            .map_err(|err| LinkError::Instantiate(err.to_string()))?;

        if store.data().memory.is_none() {
            store.data_mut().memory = instance.get_memory(&store, "memory");
            if store.data().memory.is_none() {
                log::debug!("guest has no memory export; host calls touching memory will trap");
            }
        }

        Ok(GuestInstance::new(store, instance, parsed.func_exports))
    }
}

fn allocate_memory(store: &mut Store<GuestState>, pages: u32) -> Result<Memory, LinkError> {
    let ty = MemoryType::new(pages, Some(pages))
        .map_err(|err| LinkError::Instantiate(err.to_string()))?;
    Memory::new(&mut *store, ty).map_err(|err| LinkError::Instantiate(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use futures::executor::block_on;

    #[test]
    fn starts_unloaded() {
        let loader = ModuleLoader::new(StaticFetcher::new());
        assert_eq!(loader.state(), LoadState::Unloaded);
        assert_eq!(loader.options().memory_pages, 256);
    }

    #[test]
    fn failed_fetch_returns_to_unloaded() {
        let mut loader = ModuleLoader::new(StaticFetcher::new());
        let err = block_on(loader.load("missing.wasm", 1)).unwrap_err();
        assert!(matches!(err, LoadError::Fetch(_)));
        assert_eq!(loader.state(), LoadState::Unloaded);
    }

    #[test]
    fn empty_module_becomes_ready() {
        let mut fetcher = StaticFetcher::new();
        fetcher.insert("empty.wasm", wat::parse_str("(module)").unwrap());
        let mut loader = ModuleLoader::new(fetcher);

        let instance = block_on(loader.load("empty.wasm", 1)).unwrap();
        assert_eq!(loader.state(), LoadState::Ready);
        assert!(instance.is_ready());
        assert!(instance.exports().is_empty());
    }

    #[test]
    fn re_registering_an_extension_replaces_it() {
        let mut loader = ModuleLoader::new(StaticFetcher::new());
        loader.func_wrap("tick", || {});
        loader.func_wrap("tick", |_: i32| {});
        assert_eq!(loader.extensions.len(), 1);
    }

    #[test]
    fn load_state_display() {
        assert_eq!(LoadState::Instantiating.to_string(), "instantiating");
    }
}
