//! Keyed resource cache with single-flight construction.
//!
//! A [`ResourceCache`] maps keys to values living in an [`AliasArena`]. The
//! first `get` of a key builds the value through the cache's [`Creator`];
//! every later `get` while any handle is alive returns another alias of the
//! same value. When the last alias is dropped the entry is erased and the
//! value is handed to the `on_release` callback.
//!
//! The key travels with each value's destroy strategy, so eviction is a
//! direct map lookup checked against the value's identity.

use std::borrow::Borrow;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::{debug, warn};

use crate::alias::{AliasArena, Destroy, Handle, ValueId};
use crate::config::CacheConfig;
use crate::constructor::{Creator, PluggableConstructor};
use crate::error::{integration_fault, ResourceError};

/// Eviction callback: receives the key and takes ownership of the value.
pub type ReleaseFn<K, T> = Rc<dyn Fn(&K, T)>;

/// Counters for one cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub constructions: u64,
    pub null_constructions: u64,
    pub evictions: u64,
}

struct CacheState<K> {
    entries: HashMap<K, ValueId>,
    stats: CacheStats,
}

struct CacheInner<K, T, C> {
    config: CacheConfig,
    arena: AliasArena<T>,
    creator: RefCell<C>,
    state: RefCell<CacheState<K>>,
    on_release: RefCell<Option<ReleaseFn<K, T>>>,
}

impl<K, T, C> CacheInner<K, T, C>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    fn release(&self, key: &K, id: Option<ValueId>, value: T) {
        let erased = {
            let mut state = self.state.borrow_mut();
            let current = state.entries.get(key).copied();
            if current.is_some() && current == id {
                state.entries.remove(key);
                state.stats.evictions += 1;
                true
            } else {
                false
            }
        };
        if !erased {
            integration_fault(&ResourceError::ConsistencyViolation(format!(
                "cache `{}` holds no entry {key:?} for released value {id:?}",
                self.config.name
            )));
            return;
        }

        debug!(cache = %self.config.name, ?key, "resource evicted");
        let callback = self.on_release.borrow().clone();
        match callback {
            Some(on_release) => on_release(key, value),
            None => integration_fault(&ResourceError::MissingReleaseCallback(
                self.config.name.clone(),
            )),
        }
    }
}

/// Destroy strategy bound into every handle a cache hands out.
struct CacheRelease<K, T, C> {
    cache: Weak<CacheInner<K, T, C>>,
    key: K,
    id: Cell<Option<ValueId>>,
}

impl<K, T, C> Destroy<T> for CacheRelease<K, T, C>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    fn destroy(&self, value: T) {
        match self.cache.upgrade() {
            Some(cache) => cache.release(&self.key, self.id.get(), value),
            None => warn!(key = ?self.key, "handle outlived its cache, dropping value"),
        }
    }
}

/// Keyed, deduplicating store of shared values.
///
/// Cloning a `ResourceCache` clones a reference to the same cache.
pub struct ResourceCache<K, T, C = PluggableConstructor<K, T>> {
    inner: Rc<CacheInner<K, T, C>>,
}

impl<K, T, C> Clone for ResourceCache<K, T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, T, C> fmt::Debug for ResourceCache<K, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ResourceCache")
            .field("name", &self.inner.config.name)
            .field("entries", &state.entries.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl<K, T, C> ResourceCache<K, T, C>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
    T: 'static,
    C: Creator<K, T> + 'static,
{
    pub fn new(creator: C) -> Self {
        Self::with_config(creator, CacheConfig::default())
    }

    pub fn with_config(creator: C, config: CacheConfig) -> Self {
        let arena = AliasArena::with_capacity(config.initial_capacity, config.validate_chains);
        Self {
            inner: Rc::new(CacheInner {
                state: RefCell::new(CacheState {
                    entries: HashMap::with_capacity(config.initial_capacity),
                    stats: CacheStats::default(),
                }),
                config,
                arena,
                creator: RefCell::new(creator),
                on_release: RefCell::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Installs the eviction callback. It owns reclaiming the value.
    pub fn set_on_release(&self, on_release: impl Fn(&K, T) + 'static) {
        *self.inner.on_release.borrow_mut() = Some(Rc::new(on_release));
    }

    /// Gives mutable access to the creator, e.g. to install a closure on a
    /// [`PluggableConstructor`]. Must not be called from inside a creator.
    pub fn configure_creator<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.inner.creator.borrow_mut())
    }

    /// Returns an alias of `key`'s value, building it on a miss.
    ///
    /// A declined construction yields an empty handle and leaves no entry.
    pub fn get<Q>(&self, key: &Q) -> Result<Handle<T>, ResourceError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(handle) = self.lookup(key) {
            return Ok(handle);
        }

        let key = key.to_owned();
        self.inner.state.borrow_mut().stats.misses += 1;
        // No cache borrow is held here: creators may consult other caches.
        let created = self.inner.creator.borrow().create(&key)?;
        let Some(value) = created else {
            self.inner.state.borrow_mut().stats.null_constructions += 1;
            debug!(cache = %self.inner.config.name, ?key, "construction declined");
            return Ok(Handle::default());
        };

        if let Some(existing) = self.lookup::<K>(&key) {
            // The creator re-entered this cache for the same key.
            warn!(cache = %self.inner.config.name, ?key, "key built twice in one flight, keeping the first");
            return Ok(existing);
        }

        self.inner.state.borrow_mut().stats.constructions += 1;
        let handle = self.insert(key, value);
        debug!(cache = %self.inner.config.name, value = ?handle.value_id(), "resource constructed");
        Ok(handle)
    }

    /// Returns an alias of `key`'s value if it is live. Never constructs.
    pub fn lookup<Q>(&self, key: &Q) -> Option<Handle<T>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let id = self.inner.state.borrow().entries.get(key).copied()?;
        match self.inner.arena.alias(id) {
            Some(handle) => {
                self.inner.state.borrow_mut().stats.hits += 1;
                Some(handle)
            }
            None => {
                integration_fault(&ResourceError::ConsistencyViolation(format!(
                    "cache `{}` maps a key to dead value {id}",
                    self.inner.config.name
                )));
                self.inner.state.borrow_mut().entries.remove(key);
                None
            }
        }
    }

    /// Adopts an externally built value under `key`.
    pub fn register(&self, key: K, value: T) -> Result<Handle<T>, ResourceError> {
        if self.contains(&key) {
            return Err(ResourceError::AlreadyRegistered(format!("{key:?}")));
        }
        debug!(cache = %self.inner.config.name, ?key, "resource registered");
        Ok(self.insert(key, value))
    }

    fn insert(&self, key: K, value: T) -> Handle<T> {
        let strategy = Rc::new(CacheRelease {
            cache: Rc::downgrade(&self.inner),
            key: key.clone(),
            id: Cell::new(None),
        });
        let handle = self
            .inner
            .arena
            .adopt_shared(value, Rc::clone(&strategy) as Rc<dyn Destroy<T>>);
        strategy.id.set(handle.value_id());
        if let Some(id) = handle.value_id() {
            self.inner.state.borrow_mut().entries.insert(key, id);
        }
        handle
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.state.borrow().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.state.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.state.borrow().entries.keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.state.borrow().stats
    }

    /// Checks that entries and alias chains agree.
    pub fn check_invariants(&self) -> Result<(), ResourceError> {
        self.inner.arena.check_invariants()?;
        let live = self.inner.arena.live_values();
        let state = self.inner.state.borrow();
        if state.entries.len() != live {
            return Err(ResourceError::ConsistencyViolation(format!(
                "cache `{}` has {} entries for {live} live values",
                self.inner.config.name,
                state.entries.len()
            )));
        }
        match state.entries.values().find(|id| !self.inner.arena.contains(**id)) {
            Some(id) => Err(ResourceError::ConsistencyViolation(format!(
                "entry for dead value {id}"
            ))),
            None => Ok(()),
        }
    }
}
