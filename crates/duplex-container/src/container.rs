//! The container and its resolver.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use duplex_settings::Settings;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use crate::errors::{ContainerError, Result};
use crate::key::Key;
use crate::lazy::Lazy;
use crate::plan::ResolutionPlan;

pub(crate) type Erased = Arc<dyn Any + Send + Sync>;
pub(crate) type Factory = Arc<dyn Fn(&Resolver<'_>) -> Result<Erased> + Send + Sync>;

pub(crate) struct Definition {
    pub(crate) key: Key,
    pub(crate) factory: Factory,
    pub(crate) lazy: bool,
}

/// A type that knows how to build itself from the container.
///
/// Dependencies are pulled from the [`Resolver`]; every `get` made here is
/// recorded as an edge of the construction graph.
///
/// ```ignore
/// struct Greeter { settings: Arc<Settings> }
///
/// impl Injectable for Greeter {
///     fn inject(r: &Resolver<'_>) -> Result<Self> {
///         Ok(Self { settings: r.get()? })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Construct `Self`, resolving dependencies through `resolver`.
    fn inject(resolver: &Resolver<'_>) -> Result<Self>;
}

/// Resolution context handed to factories.
///
/// Tracks the chain of definitions under construction so cycles are
/// reported instead of overflowing the stack.
pub struct Resolver<'c> {
    container: &'c Container,
    stack: RefCell<Vec<Key>>,
}

impl<'c> Resolver<'c> {
    fn new(container: &'c Container) -> Self {
        Self {
            container,
            stack: RefCell::new(Vec::new()),
        }
    }

    /// Resolve the unnamed definition of `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.container.resolve_typed(self, &Key::of::<T>())
    }

    /// Resolve the definition of `T` registered under `name`.
    pub fn get_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.container.resolve_typed(self, &Key::named::<T>(name))
    }

    /// A proxy for `T` that constructs on first access.
    pub fn lazy<T: Send + Sync + 'static>(&self) -> Result<Lazy<T>> {
        let key = Key::of::<T>();
        self.container.record_edge(self, &key);
        self.container.lazy_for(key)
    }

    /// The container being resolved from.
    pub fn container(&self) -> &'c Container {
        self.container
    }
}

/// Holds definitions and the singletons built from them.
///
/// Each definition is constructed at most once; later resolutions share the
/// same `Arc`. Construction is serialized by a re-entrant lock so that
/// factories may resolve their own dependencies on the same thread.
pub struct Container {
    definitions: HashMap<Key, Definition>,
    singletons: Mutex<HashMap<Key, Erased>>,
    edges: Mutex<BTreeMap<String, BTreeSet<String>>>,
    construction: ReentrantMutex<()>,
    plan: Mutex<Option<ResolutionPlan>>,
    this: Weak<Container>,
}

impl Container {
    pub(crate) fn new(definitions: HashMap<Key, Definition>, this: Weak<Container>) -> Self {
        Self {
            definitions,
            singletons: Mutex::new(HashMap::new()),
            edges: Mutex::new(BTreeMap::new()),
            construction: ReentrantMutex::new(()),
            plan: Mutex::new(None),
            this,
        }
    }

    /// Resolve the unnamed definition of `T`.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_typed(&Resolver::new(self), &Key::of::<T>())
    }

    /// Resolve the definition of `T` registered under `name`.
    pub fn resolve_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.resolve_typed(&Resolver::new(self), &Key::named::<T>(name))
    }

    /// A proxy for `T` that constructs on first access.
    pub fn lazy<T: Send + Sync + 'static>(&self) -> Result<Lazy<T>> {
        self.lazy_for(Key::of::<T>())
    }

    /// The registered [`Settings`].
    pub fn settings(&self) -> Result<Arc<Settings>> {
        self.resolve()
    }

    /// Whether an unnamed definition of `T` exists.
    pub fn contains<T: 'static>(&self) -> bool {
        self.definitions.contains_key(&Key::of::<T>())
    }

    /// Whether `T` is registered under `name`.
    pub fn contains_named<T: 'static>(&self, name: &str) -> bool {
        self.definitions.contains_key(&Key::named::<T>(name))
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no definitions are registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Construct every eager definition and return the recorded plan.
    ///
    /// Lazy definitions are left unconstructed. The plan is kept and
    /// available afterwards through [`Container::plan`].
    pub fn compile(&self) -> Result<ResolutionPlan> {
        let mut keys: Vec<&Definition> = self.definitions.values().filter(|d| !d.lazy).collect();
        keys.sort_by(|a, b| a.key.label().cmp(b.key.label()));
        for definition in keys {
            let _ = self.resolve_erased(&Resolver::new(self), &definition.key)?;
        }
        let plan = ResolutionPlan::from_graph(&self.definition_map(), &self.edges.lock());
        *self.plan.lock() = Some(plan.clone());
        Ok(plan)
    }

    /// Fail fast if any eager definition cannot be constructed.
    pub fn validate(&self) -> Result<()> {
        if self.plan.lock().is_some() {
            return Ok(());
        }
        self.compile().map(|_| ())
    }

    /// The plan from the last [`compile`](Self::compile) or cache load.
    pub fn plan(&self) -> Option<ResolutionPlan> {
        self.plan.lock().clone()
    }

    /// Construct singletons following a previously compiled plan.
    pub(crate) fn warm(&self, plan: &ResolutionPlan) -> Result<()> {
        let by_label: HashMap<&str, &Key> = self
            .definitions
            .keys()
            .map(|key| (key.label(), key))
            .collect();
        for label in &plan.order {
            let key = by_label
                .get(label.as_str())
                .ok_or_else(|| ContainerError::Unresolvable { key: label.clone() })?;
            let _ = self.resolve_erased(&Resolver::new(self), key)?;
        }
        *self.plan.lock() = Some(plan.clone());
        debug!(constructed = plan.order.len(), "container warmed from plan");
        Ok(())
    }

    /// Definition labels mapped to their lazy flag.
    pub(crate) fn definition_map(&self) -> BTreeMap<String, bool> {
        self.definitions
            .values()
            .map(|d| (d.key.label().to_string(), d.lazy))
            .collect()
    }

    pub(crate) fn resolve_key<T: Send + Sync + 'static>(&self, key: &Key) -> Result<Arc<T>> {
        self.resolve_typed(&Resolver::new(self), key)
    }

    fn resolve_typed<T: Send + Sync + 'static>(
        &self,
        resolver: &Resolver<'_>,
        key: &Key,
    ) -> Result<Arc<T>> {
        self.resolve_erased(resolver, key)?
            .downcast::<T>()
            .map_err(|_| {
                ContainerError::construction(key.label(), "factory produced a different type")
            })
    }

    fn lazy_for<T: Send + Sync + 'static>(&self, key: Key) -> Result<Lazy<T>> {
        if !self.definitions.contains_key(&key) {
            return Err(ContainerError::Unresolvable {
                key: key.label().to_string(),
            });
        }
        Ok(Lazy::new(self.this.clone(), key))
    }

    fn record_edge(&self, resolver: &Resolver<'_>, key: &Key) {
        if let Some(parent) = resolver.stack.borrow().last() {
            let _ = self
                .edges
                .lock()
                .entry(parent.label().to_string())
                .or_default()
                .insert(key.label().to_string());
        }
    }

    fn resolve_erased(&self, resolver: &Resolver<'_>, key: &Key) -> Result<Erased> {
        self.record_edge(resolver, key);

        if let Some(existing) = self.singletons.lock().get(key) {
            return Ok(Arc::clone(existing));
        }

        let _guard = self.construction.lock();
        if let Some(existing) = self.singletons.lock().get(key) {
            return Ok(Arc::clone(existing));
        }

        let definition = self
            .definitions
            .get(key)
            .ok_or_else(|| ContainerError::Unresolvable {
                key: key.label().to_string(),
            })?;

        {
            let stack = resolver.stack.borrow();
            if let Some(pos) = stack.iter().position(|k| k == key) {
                let mut path: Vec<String> =
                    stack[pos..].iter().map(|k| k.label().to_string()).collect();
                path.push(key.label().to_string());
                return Err(ContainerError::Cycle { path });
            }
        }

        resolver.stack.borrow_mut().push(key.clone());
        let built = (definition.factory)(resolver);
        let _ = resolver.stack.borrow_mut().pop();
        let value = built?;

        debug!(key = %key, "constructed definition");
        let _ = self
            .singletons
            .lock()
            .insert(key.clone(), Arc::clone(&value));
        Ok(value)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("definitions", &self.definitions.len())
            .field("constructed", &self.singletons.lock().len())
            .finish_non_exhaustive()
    }
}
