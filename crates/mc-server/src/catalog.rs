//! EngineCatalog: engine factories selectable by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use mc_protocol::EngineFactory;
use tracing::debug;

use crate::error::LifecycleError;

/// Named engine factories. The server picks one at startup.
#[derive(Default, Clone)]
pub struct EngineCatalog {
    factories: BTreeMap<String, Arc<dyn EngineFactory>>,
}

impl EngineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factories(factories: impl IntoIterator<Item = Arc<dyn EngineFactory>>) -> Self {
        let mut catalog = Self::new();
        for factory in factories {
            catalog.register(factory);
        }
        catalog
    }

    /// Register `factory` under its own name, replacing any previous one.
    pub fn register(&mut self, factory: Arc<dyn EngineFactory>) {
        debug!(engine = factory.name(), "engine registered");
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn EngineFactory>, LifecycleError> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownEngine {
                name: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
