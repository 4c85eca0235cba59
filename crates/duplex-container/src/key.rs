//! Definition keys.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies one definition: a type, optionally qualified by a name.
///
/// Equality and hashing use the [`TypeId`] and name; the label is the
/// human-readable form written to logs and cache files.
#[derive(Clone, Debug)]
pub struct Key {
    type_id: TypeId,
    name: Option<String>,
    label: String,
}

impl Key {
    /// Key for the unnamed definition of `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: None,
            label: type_name::<T>().to_string(),
        }
    }

    /// Key for the definition of `T` registered under `name`.
    pub fn named<T: 'static>(name: &str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: Some(name.to_string()),
            label: format!("{}#{name}", type_name::<T>()),
        }
    }

    /// The qualifying name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stable textual form.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;

    #[test]
    fn same_type_same_key() {
        assert_eq!(Key::of::<Alpha>(), Key::of::<Alpha>());
    }

    #[test]
    fn name_distinguishes() {
        assert_ne!(Key::of::<Alpha>(), Key::named::<Alpha>("x"));
        assert_ne!(Key::named::<Alpha>("x"), Key::named::<Alpha>("y"));
        assert_eq!(Key::named::<Alpha>("x"), Key::named::<Alpha>("x"));
    }

    #[test]
    fn label_includes_name() {
        let key = Key::named::<Alpha>("chat.open");
        assert!(key.label().ends_with("Alpha#chat.open"));
        assert_eq!(key.name(), Some("chat.open"));
        assert_eq!(key.to_string(), key.label());
    }
}
