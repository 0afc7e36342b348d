//! Name-to-constructor registries for storage and serializer plugins

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::serializer::{JsonSerializer, Serializer, YamlSerializer};
use crate::sqlite_store::SqliteStore;
use crate::store::{InMemoryStore, TransactionStore};

pub type StoreFactory = fn() -> Box<dyn TransactionStore>;
pub type SerializerFactory = fn() -> Arc<dyn Serializer>;

/// Maps `repository.kind` identifiers to store constructors.
///
/// Constructors return an unbound, uninitialized store; the caller binds the
/// serializer and runs `init`.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `memory` and `sqlite` stores
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", || Box::new(InMemoryStore::new()));
        registry.register("sqlite", || Box::new(SqliteStore::new()));
        registry
    }

    /// Register a constructor, replacing any previous one under `name`
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn TransactionStore>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

/// Maps `repository.serializer` identifiers to codec constructors
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    factories: BTreeMap<String, SerializerFactory>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `json` and `yaml` codecs
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("json", || Arc::new(JsonSerializer));
        registry.register("yaml", || Arc::new(YamlSerializer));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: SerializerFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn Serializer>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
