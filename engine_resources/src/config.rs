//! Cache configuration.
//!
//! Loads per-cache settings from JSON strings (file IO left to the app).

use serde::{Deserialize, Serialize};

/// Settings for one [`ResourceCache`](crate::cache::ResourceCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Label attached to every log event of the cache, e.g. `textures`.
    #[serde(default = "default_name")]
    pub name: String,
    /// Entries (and alias slots) to reserve up front.
    #[serde(default)]
    pub initial_capacity: usize,
    /// Walk alias chains after every splice.
    #[serde(default = "default_validate_chains")]
    pub validate_chains: bool,
}

fn default_name() -> String {
    "resources".to_string()
}

fn default_validate_chains() -> bool {
    cfg!(debug_assertions)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            initial_capacity: 0,
            validate_chains: default_validate_chains(),
        }
    }
}

impl CacheConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
