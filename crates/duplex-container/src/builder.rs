//! Container construction.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use duplex_settings::Settings;
use tracing::{debug, info};

use crate::cache::{self, ProxyManifest};
use crate::container::{Container, Definition, Erased, Injectable, Resolver};
use crate::errors::{ContainerError, Result};
use crate::key::Key;

/// Collects definitions and caching options, then builds a [`Container`].
///
/// Registering the same key twice keeps the later definition.
#[derive(Default)]
pub struct ContainerBuilder {
    definitions: HashMap<Key, Definition>,
    lazy: HashSet<Key>,
    compilation: Option<PathBuf>,
    proxies: Option<PathBuf>,
}

impl ContainerBuilder {
    /// Empty builder with caching disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded from settings.
    ///
    /// Registers `settings` as an instance and, when `app.cache` is set,
    /// enables plan compilation and proxy output at the configured paths.
    pub fn from_settings(settings: Arc<Settings>) -> Self {
        let builder = if settings.app.cache {
            Self::new()
                .enable_compilation(settings.cache.compilation.clone())
                .write_proxies_to(settings.cache.proxies.clone())
        } else {
            Self::new()
        };
        builder.with_settings(settings)
    }

    /// Register `settings` so factories can resolve `Arc<Settings>`.
    pub fn with_settings(self, settings: Arc<Settings>) -> Self {
        self.instance_arc(settings)
    }

    /// Register `T` built through its [`Injectable`] impl.
    pub fn autowire<T: Injectable>(self) -> Self {
        self.factory::<T, _>(T::inject)
    }

    /// Register `T` built by `factory`.
    pub fn factory<T, F>(self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.define(Key::of::<T>(), factory)
    }

    /// Register `T` under `name`, built by `factory`.
    pub fn named<T, F>(self, name: &str, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.define(Key::named::<T>(name), factory)
    }

    /// Register an already constructed value.
    pub fn instance<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.instance_arc(Arc::new(value))
    }

    /// Register an already constructed shared value.
    pub fn instance_arc<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        let key = Key::of::<T>();
        let erased: Erased = value;
        let definition = Definition {
            key: key.clone(),
            factory: Arc::new(move |_: &Resolver<'_>| Ok(Arc::clone(&erased))),
            lazy: false,
        };
        self.insert(key, definition);
        self
    }

    /// Hand out `T` behind a [`Lazy`](crate::Lazy) proxy and skip it when warming.
    pub fn lazy<T: 'static>(mut self) -> Self {
        let _ = self.lazy.insert(Key::of::<T>());
        self
    }

    /// Persist the resolution plan under `dir`.
    pub fn enable_compilation(mut self, dir: impl Into<PathBuf>) -> Self {
        self.compilation = Some(dir.into());
        self
    }

    /// Persist the proxy manifest under `dir`.
    pub fn write_proxies_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.proxies = Some(dir.into());
        self
    }

    /// Finish registration.
    ///
    /// Without caching this performs no construction. With caching, a valid
    /// cached plan is used to warm singletons in its recorded order;
    /// otherwise the plan is derived and written.
    pub fn build(self) -> Result<Arc<Container>> {
        let Self {
            mut definitions,
            lazy,
            compilation,
            proxies,
        } = self;

        for key in lazy {
            let definition = definitions
                .get_mut(&key)
                .ok_or_else(|| ContainerError::Unresolvable {
                    key: key.label().to_string(),
                })?;
            definition.lazy = true;
        }

        let container = Arc::new_cyclic(|this| Container::new(definitions, this.clone()));

        if compilation.is_none() && proxies.is_none() {
            return Ok(container);
        }

        let definitions = container.definition_map();
        let cached = compilation
            .as_deref()
            .and_then(|dir| cache::load_plan(dir, &definitions));

        let plan = if let Some(plan) = cached {
            container.warm(&plan)?;
            info!(entries = plan.entries.len(), "using cached resolution plan");
            plan
        } else {
            let plan = container.compile()?;
            if let Some(dir) = &compilation {
                let _ = cache::write_plan_once(dir, &plan)?;
            }
            plan
        };

        if let Some(dir) = &proxies {
            let manifest = ProxyManifest {
                fingerprint: plan.fingerprint.clone(),
                proxies: plan.lazy_keys(),
            };
            let _ = cache::write_proxies_once(dir, &manifest)?;
        }

        Ok(container)
    }

    fn define<T, F>(mut self, key: Key, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let definition = Definition {
            key: key.clone(),
            factory: Arc::new(move |r: &Resolver<'_>| {
                let value: Erased = Arc::new(factory(r)?);
                Ok(value)
            }),
            lazy: false,
        };
        self.insert(key, definition);
        self
    }

    fn insert(&mut self, key: Key, definition: Definition) {
        if self.definitions.insert(key.clone(), definition).is_some() {
            debug!(key = %key, "definition replaced");
        }
    }
}

impl std::fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("definitions", &self.definitions.len())
            .field("compilation", &self.compilation)
            .field("proxies", &self.proxies)
            .finish_non_exhaustive()
    }
}
