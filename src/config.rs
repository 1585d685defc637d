//! Cache configuration.
//!
//! Loaded from a TOML file with environment-variable overrides, or built in
//! code. Example:
//!
//! ```toml
//! key_prefix = "strato"
//! versions = ["v1", "v2"]
//! default_version = "v1"
//! populate_cold = false
//! memory_entry_limit = 10000
//! ```

use std::num::NonZeroUsize;
use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::CacheError;

const DEFAULT_KEY_PREFIX: &str = "strato";
const DEFAULT_VERSION: &str = "default";
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 10_000;
const ENV_PREFIX: &str = "STRATO";

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Leading component of every store key.
    pub key_prefix: String,
    /// Registered cache versions. Each version namespaces an independent
    /// cached representation of the same entities.
    pub versions: Vec<String>,
    /// The version used when callers pass none.
    pub default_version: String,
    /// Cascade policy: when true, deferred reprocessing reloads entities from
    /// the system of record and rehydrates cold entries (self-healing). When
    /// false, cascades run update-only and skip entries the cache never held.
    pub populate_cold: bool,
    /// Maximum entries in the in-process `MemoryStore`.
    pub memory_entry_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            versions: vec![DEFAULT_VERSION.to_string()],
            default_version: DEFAULT_VERSION.to_string(),
            populate_cold: true,
            memory_entry_limit: DEFAULT_MEMORY_ENTRY_LIMIT,
        }
    }
}

impl CacheConfig {
    /// Load from a TOML file, then apply `STRATO_*` environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let built = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|err| CacheError::config(err.to_string()))?;
        let loaded: Self = built
            .try_deserialize()
            .map_err(|err| CacheError::config(err.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check internal consistency; called by the engine at construction.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.key_prefix.is_empty() || self.key_prefix.contains('_') {
            return Err(CacheError::config(format!(
                "key prefix `{}` must be non-empty and `_`-free",
                self.key_prefix
            )));
        }
        if self.versions.is_empty() {
            return Err(CacheError::config("at least one cache version is required"));
        }
        for version in &self.versions {
            if version.is_empty() || version.contains('_') {
                return Err(CacheError::config(format!(
                    "version `{version}` must be non-empty and `_`-free"
                )));
            }
        }
        if !self.versions.contains(&self.default_version) {
            return Err(CacheError::config(format!(
                "default version `{}` is not in the version list",
                self.default_version
            )));
        }
        Ok(())
    }

    pub fn memory_entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_entry_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
