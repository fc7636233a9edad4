//! Class registries.
//!
//! Controllers and models register themselves into the registry of the
//! active application context, so that a context reset also resets what
//! has been registered. Registration is keyed by type and idempotent.

use std::any::TypeId;

/// A registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: &'static str,
    pub type_id: TypeId,
}

/// Ordered collection of registered types.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`. Returns false if it was already present.
    pub fn register<T: 'static>(&mut self, name: &'static str) -> bool {
        let type_id = TypeId::of::<T>();
        if self.is_member(type_id) {
            return false;
        }
        tracing::debug!(name, "registered");
        self.entries.push(RegistryEntry { name, type_id });
        true
    }

    pub fn is_member(&self, type_id: TypeId) -> bool {
        self.entries.iter().any(|e| e.type_id == type_id)
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.is_member(TypeId::of::<T>())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PostsController;
    struct UsersController;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = Registry::new();
        assert!(registry.register::<PostsController>("PostsController"));
        assert!(!registry.register::<PostsController>("PostsController"));
        assert!(registry.register::<UsersController>("UsersController"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["PostsController", "UsersController"]);
    }

    #[test]
    fn test_membership() {
        let mut registry = Registry::new();
        registry.register::<PostsController>("PostsController");
        assert!(registry.contains::<PostsController>());
        assert!(!registry.contains::<UsersController>());
        assert!(registry.get_by_name("PostsController").is_some());
    }
}
