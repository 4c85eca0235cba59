//! Lazy proxies.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use crate::container::Container;
use crate::errors::{ContainerError, Result};
use crate::key::Key;

/// Stand-in for a definition that is constructed on first access.
///
/// Holds only a weak reference to the container, so a proxy stored inside
/// a singleton does not keep the container alive.
pub struct Lazy<T> {
    container: Weak<Container>,
    key: Key,
    value: OnceLock<Arc<T>>,
}

impl<T: Send + Sync + 'static> Lazy<T> {
    pub(crate) fn new(container: Weak<Container>, key: Key) -> Self {
        Self {
            container,
            key,
            value: OnceLock::new(),
        }
    }

    /// Resolve the proxied definition, constructing it on first call.
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(value) = self.value.get() {
            return Ok(Arc::clone(value));
        }
        let container = self.container.upgrade().ok_or_else(|| ContainerError::Dropped {
            key: self.key.label().to_string(),
        })?;
        let value = container.resolve_key::<T>(&self.key)?;
        let _ = self.value.set(Arc::clone(&value));
        Ok(value)
    }

    /// Whether [`get`](Self::get) has succeeded at least once.
    pub fn is_initialized(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("key", &self.key.label())
            .field("initialized", &self.value.get().is_some())
            .finish()
    }
}
