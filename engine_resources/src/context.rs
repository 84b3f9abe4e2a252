//! Explicit cache lifecycle.
//!
//! Instead of a process-wide static per cache type, a [`ResourceContext`] is
//! created by the application and passed to whoever needs caches. It holds at
//! most one [`ResourceCache`] per `(key, value, creator)` type triple.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use tracing::{info, warn};

use crate::cache::ResourceCache;
use crate::config::CacheConfig;
use crate::constructor::Creator;
use crate::error::{integration_fault, ResourceError};

/// Owner of the running caches, keyed by cache type.
#[derive(Default)]
pub struct ResourceContext {
    caches: HashMap<TypeId, Box<dyn Any>>,
}

impl fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContext")
            .field("caches", &self.caches.len())
            .finish()
    }
}

impl ResourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the cache for `(K, T, C)` with a default config named after
    /// the value type.
    pub fn start_up<K, T, C>(&mut self, creator: C) -> Result<ResourceCache<K, T, C>, ResourceError>
    where
        K: Eq + Hash + Clone + fmt::Debug + 'static,
        T: 'static,
        C: Creator<K, T> + 'static,
    {
        self.start_up_with(creator, CacheConfig::named(type_name::<T>()))
    }

    pub fn start_up_with<K, T, C>(
        &mut self,
        creator: C,
        config: CacheConfig,
    ) -> Result<ResourceCache<K, T, C>, ResourceError>
    where
        K: Eq + Hash + Clone + fmt::Debug + 'static,
        T: 'static,
        C: Creator<K, T> + 'static,
    {
        let id = TypeId::of::<ResourceCache<K, T, C>>();
        if self.caches.contains_key(&id) {
            let err = ResourceError::DuplicateSingleton(type_name::<ResourceCache<K, T, C>>());
            integration_fault(&err);
            return Err(err);
        }
        info!(cache = %config.name, "cache started");
        let cache = ResourceCache::with_config(creator, config);
        self.caches.insert(id, Box::new(cache.clone()));
        Ok(cache)
    }

    /// Stops the cache for `(K, T, C)`. Handles still alive keep their values
    /// until dropped; their eviction is then skipped.
    pub fn shut_down<K, T, C>(&mut self) -> Result<(), ResourceError>
    where
        K: Eq + Hash + Clone + fmt::Debug + 'static,
        T: 'static,
        C: Creator<K, T> + 'static,
    {
        let cache = self
            .caches
            .remove(&TypeId::of::<ResourceCache<K, T, C>>())
            .and_then(|boxed| boxed.downcast::<ResourceCache<K, T, C>>().ok());
        let Some(cache) = cache else {
            let err = ResourceError::UninitializedSingleton(type_name::<ResourceCache<K, T, C>>());
            integration_fault(&err);
            return Err(err);
        };
        if !cache.is_empty() {
            warn!(cache = %cache.config().name, live = cache.len(), "cache shut down with live entries");
        }
        info!(cache = %cache.config().name, stats = ?cache.stats(), "cache shut down");
        Ok(())
    }

    /// The running cache for `(K, T, C)`.
    ///
    /// A missing cache is returned as an error without faulting, so callers
    /// may probe.
    pub fn cache<K, T, C>(&self) -> Result<ResourceCache<K, T, C>, ResourceError>
    where
        K: 'static,
        T: 'static,
        C: 'static,
    {
        let name = type_name::<ResourceCache<K, T, C>>();
        self.caches
            .get(&TypeId::of::<ResourceCache<K, T, C>>())
            .and_then(|boxed| boxed.downcast_ref::<ResourceCache<K, T, C>>())
            .cloned()
            .ok_or(ResourceError::UninitializedSingleton(name))
    }

    pub fn is_running<K: 'static, T: 'static, C: 'static>(&self) -> bool {
        self.caches.contains_key(&TypeId::of::<ResourceCache<K, T, C>>())
    }
}
