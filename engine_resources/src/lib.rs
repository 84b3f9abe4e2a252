//! `engine_resources`
//!
//! Deduplicated, shared engine resources (shaders, textures, materials).
//!
//! Design goals:
//! - One live value per key; construction runs once per key lifetime.
//! - Shared ownership through alias chains rather than reference counts.
//! - Construction is pluggable: closures, or data-driven factories picked by
//!   a config node's type tag.
//! - Explicit cache lifecycle through a context object, no global state.
//! - No `unsafe`.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`); the compiler keeps
//! handles and caches on the thread that created them.

pub mod alias;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod constructor;
pub mod context;
pub mod error;
pub mod factory;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::alias::{AliasArena, Destroy, DropValue, Handle, ValueId};
    pub use crate::cache::{CacheStats, ResourceCache};
    pub use crate::catalog::ConfigCatalog;
    pub use crate::config::CacheConfig;
    pub use crate::constructor::{Creator, PluggableConstructor};
    pub use crate::context::ResourceContext;
    pub use crate::error::ResourceError;
    pub use crate::factory::{ConfigNode, FactoryRegistry};
}
