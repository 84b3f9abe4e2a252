//! Named config nodes feeding a [`FactoryRegistry`].
//!
//! A catalog is a JSON object mapping resource names to config nodes:
//!
//! ```json
//! {
//!   "sun":   { "type": "DirectionalLight", "intensity": 3.0 },
//!   "torch": { "type": "PointLight", "radius": 4.0 }
//! }
//! ```
//!
//! Used as a cache [`Creator`], it turns `get("sun")` into a data-driven
//! construction of whatever type the node names.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::constructor::Creator;
use crate::error::ResourceError;
use crate::factory::{ConfigNode, FactoryRegistry};

pub struct ConfigCatalog<T> {
    registry: FactoryRegistry<T>,
    nodes: HashMap<String, ConfigNode>,
}

impl<T> fmt::Debug for ConfigCatalog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigCatalog")
            .field("registry", &self.registry)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl<T> ConfigCatalog<T> {
    pub fn new(registry: FactoryRegistry<T>) -> Self {
        Self {
            registry,
            nodes: HashMap::new(),
        }
    }

    /// Parses a catalog object. Every entry must be a JSON object.
    pub fn from_json_str(registry: FactoryRegistry<T>, s: &str) -> serde_json::Result<Self> {
        let nodes: HashMap<String, serde_json::Map<String, ConfigNode>> = serde_json::from_str(s)?;
        Ok(Self {
            registry,
            nodes: nodes
                .into_iter()
                .map(|(name, fields)| (name, ConfigNode::Object(fields)))
                .collect(),
        })
    }

    /// Adds or replaces the node behind `name`. Only affects values built
    /// after the call.
    pub fn insert(&mut self, name: impl Into<String>, node: ConfigNode) -> Option<ConfigNode> {
        self.nodes.insert(name.into(), node)
    }

    pub fn node(&self, name: &str) -> Option<&ConfigNode> {
        self.nodes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn registry(&self) -> &FactoryRegistry<T> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FactoryRegistry<T> {
        &mut self.registry
    }
}

impl<T> Creator<String, T> for ConfigCatalog<T> {
    fn create(&self, key: &String) -> Result<Option<T>, ResourceError> {
        match self.nodes.get(key) {
            Some(node) => self.registry.construct(node),
            None => {
                debug!(name = %key, "no catalog entry");
                Ok(None)
            }
        }
    }
}
