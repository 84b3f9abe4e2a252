//! Error kinds for the resource core.
//!
//! Two families live here:
//! - Integration faults (singleton lifecycle, missing release callback,
//!   cache/handle consistency). These abort debug builds and are logged and
//!   degraded in release builds, see [`integration_fault`].
//! - Construction failures (unconfigured creator, unknown or duplicate
//!   factory tags). These are returned to the caller, who may substitute a
//!   fallback resource.

use thiserror::Error;

/// Errors produced by caches, constructors and factory registries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("no cache has been started for {0}")]
    UninitializedSingleton(&'static str),
    #[error("a cache is already running for {0}")]
    DuplicateSingleton(&'static str),
    #[error("cache `{0}` released a value but no release callback is installed")]
    MissingReleaseCallback(String),
    #[error("constructor has no creator installed")]
    UnconfiguredFactory,
    #[error("no factory registered for type tag `{0}`")]
    UnknownTypeTag(String),
    #[error("a factory is already registered for type tag `{0}`")]
    DuplicateFactoryTag(String),
    #[error("config node has no string `type` field")]
    MissingTypeField,
    #[error("key {0} already has a live entry")]
    AlreadyRegistered(String),
    #[error("cache/handle invariant broken: {0}")]
    ConsistencyViolation(String),
}

impl ResourceError {
    /// Whether this error signals a broken integration rather than an
    /// ordinary construction failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResourceError::UninitializedSingleton(_)
                | ResourceError::DuplicateSingleton(_)
                | ResourceError::MissingReleaseCallback(_)
                | ResourceError::ConsistencyViolation(_)
        )
    }
}

/// Reports an integration fault.
///
/// Panics in debug builds. Release builds log the fault and return so the
/// caller can degrade to an empty resource.
#[track_caller]
pub(crate) fn integration_fault(err: &ResourceError) {
    tracing::error!(error = %err, "resource integration fault");
    if cfg!(debug_assertions) {
        panic!("{err}");
    }
}
