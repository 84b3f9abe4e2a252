//! Pluggable construction.
//!
//! A [`PluggableConstructor`] holds one user-supplied creation closure for a
//! value type, so the code that references values never names the concrete
//! routine that builds them. Caches reach it through the [`Creator`] trait.

use std::fmt;

use crate::alias::Handle;
use crate::error::ResourceError;

/// Builds values for a cache from their key.
///
/// `Ok(None)` is a declined construction (a missing resource), not an error.
pub trait Creator<K: ?Sized, T> {
    fn create(&self, key: &K) -> Result<Option<T>, ResourceError>;
}

/// Creation closure stored by a [`PluggableConstructor`].
pub type CreateFn<A, T> = Box<dyn Fn(&A) -> Option<T>>;

/// Runtime-swappable construction strategy for `T`, taking `A` as input.
pub struct PluggableConstructor<A: ?Sized, T> {
    creator: Option<CreateFn<A, T>>,
}

impl<A: ?Sized, T> Default for PluggableConstructor<A, T> {
    fn default() -> Self {
        Self { creator: None }
    }
}

impl<A: ?Sized, T> fmt::Debug for PluggableConstructor<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluggableConstructor")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl<A: ?Sized, T> PluggableConstructor<A, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_creator(creator: impl Fn(&A) -> Option<T> + 'static) -> Self {
        let mut constructor = Self::new();
        constructor.set_creator(creator);
        constructor
    }

    /// Installs (or replaces) the creation closure.
    pub fn set_creator(&mut self, creator: impl Fn(&A) -> Option<T> + 'static) {
        self.creator = Some(Box::new(creator));
    }

    pub fn is_configured(&self) -> bool {
        self.creator.is_some()
    }

    pub fn create(&self, args: &A) -> Result<Option<T>, ResourceError> {
        let creator = self.creator.as_ref().ok_or(ResourceError::UnconfiguredFactory)?;
        Ok(creator(args))
    }

    /// Reclaims a value built by this constructor outside of any cache.
    pub fn destroy(&self, value: T) {
        tracing::trace!("destroying standalone value");
        drop(value);
    }
}

impl<A: ?Sized, T: 'static> PluggableConstructor<A, T> {
    /// Builds a value and wraps it in a sole-owner handle. A declined
    /// construction yields an empty handle.
    pub fn create_handle(&self, args: &A) -> Result<Handle<T>, ResourceError> {
        Ok(self.create(args)?.map(Handle::from_raw).unwrap_or_default())
    }
}

impl<K: ?Sized, T> Creator<K, T> for PluggableConstructor<K, T> {
    fn create(&self, key: &K) -> Result<Option<T>, ResourceError> {
        PluggableConstructor::create(self, key)
    }
}
