//! Byte sources for guest binaries.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::error::FetchError;

/// Asynchronously retrieves a guest binary by locator.
pub trait ModuleFetcher {
    fn fetch<'a>(&'a self, locator: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

/// Reads locators as filesystem paths, optionally relative to `root`.
#[derive(Debug, Clone, Default)]
pub struct FsFetcher {
    root: Option<PathBuf>,
}

impl FsFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(locator),
            None => PathBuf::from(locator),
        }
    }
}

impl ModuleFetcher for FsFetcher {
    fn fetch<'a>(&'a self, locator: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, FetchError>> {
        async move {
            let path = self.resolve(locator);
            log::debug!("fetching {}", path.display());
            std::fs::read(&path).map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => FetchError::NotFound {
                    locator: locator.to_string(),
                },
                _ => FetchError::Io {
                    locator: locator.to_string(),
                    source,
                },
            })
        }
        .boxed_local()
    }
}

/// In-memory table of binaries, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    modules: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: impl Into<String>, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.modules.insert(locator.into(), bytes.into());
        self
    }
}

impl ModuleFetcher for StaticFetcher {
    fn fetch<'a>(&'a self, locator: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, FetchError>> {
        let found = self
            .modules
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                locator: locator.to_string(),
            });
        futures::future::ready(found).boxed_local()
    }
}
