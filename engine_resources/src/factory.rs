//! Data-driven construction.
//!
//! Concrete types register a factory under a type tag at startup; config
//! nodes then pick their factory through their `"type"` field. Dispatch is a
//! single map lookup.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ResourceError;

/// Structured config data handed to factories.
pub type ConfigNode = serde_json::Value;

/// Factory stored under a type tag.
pub type FactoryFn<T> = Box<dyn Fn(&ConfigNode) -> Option<T>>;

/// Field of a [`ConfigNode`] holding its type tag.
pub const TYPE_FIELD: &str = "type";

/// Tag -> factory table.
pub struct FactoryRegistry<T> {
    factories: HashMap<String, FactoryFn<T>>,
}

impl<T> Default for FactoryRegistry<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for FactoryRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.tags().collect();
        tags.sort_unstable();
        f.debug_struct("FactoryRegistry").field("tags", &tags).finish()
    }
}

impl<T> FactoryRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `tag`. The first registration of a tag stays
    /// authoritative; later ones are rejected.
    pub fn register_factory(
        &mut self,
        tag: impl Into<String>,
        factory: impl Fn(&ConfigNode) -> Option<T> + 'static,
    ) -> Result<(), ResourceError> {
        match self.factories.entry(tag.into()) {
            Entry::Occupied(entry) => {
                warn!(tag = %entry.key(), "factory tag already registered");
                Err(ResourceError::DuplicateFactoryTag(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                debug!(tag = %entry.key(), "factory registered");
                entry.insert(Box::new(factory));
                Ok(())
            }
        }
    }

    /// Builds a value from `node`, dispatching on its `"type"` field. The
    /// factory itself may decline with `Ok(None)`.
    pub fn construct(&self, node: &ConfigNode) -> Result<Option<T>, ResourceError> {
        let tag = node
            .get(TYPE_FIELD)
            .and_then(ConfigNode::as_str)
            .ok_or(ResourceError::MissingTypeField)?;
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| ResourceError::UnknownTypeTag(tag.to_owned()))?;
        Ok(factory(node))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl<T: 'static> FactoryRegistry<T> {
    /// Registers a factory that deserializes the node into `S` and converts
    /// it into `T`. Nodes that don't deserialize make the factory decline.
    pub fn register_deserialize<S>(&mut self, tag: impl Into<String>) -> Result<(), ResourceError>
    where
        S: DeserializeOwned,
        T: From<S>,
    {
        let tag = tag.into();
        let label = tag.clone();
        self.register_factory(tag, move |node| match <S as Deserialize>::deserialize(node) {
            Ok(parsed) => Some(T::from(parsed)),
            Err(error) => {
                debug!(tag = %label, %error, "config node rejected by factory");
                None
            }
        })
    }
}
