//! The instance cache engine.
//!
//! `InstanceCache` is a pure derivation/synchronization layer between the
//! store (cached truth) and the system of record (authoritative truth). It
//! owns key derivation, per-(type, version) adapter dispatch, the batched
//! read-through of `get_instances`, and the write/invalidate protocol of
//! `update_instance`. It holds no entity data of its own and no mutable
//! state beyond its collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use crate::adapter::{AdapterRegistry, InvalidationTarget};
use crate::codec::{CodecRegistry, Payload};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::instances::CachedInstance;
use crate::keys::{Pk, store_key};
use crate::store::CacheStore;

const METRIC_INSTANCE_HITS: &str = "strato_instance_hits_total";
const METRIC_INSTANCE_MISSES: &str = "strato_instance_misses_total";

/// One requested instance: type, pk, and optionally the already-loaded
/// entity so the engine can skip a redundant load (e.g. just saved).
pub struct EntitySpec<E> {
    pub type_name: String,
    pub pk: Pk,
    pub entity: Option<Arc<E>>,
}

impl<E> Clone for EntitySpec<E> {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name.clone(),
            pk: self.pk.clone(),
            entity: self.entity.clone(),
        }
    }
}

impl<E> EntitySpec<E> {
    pub fn new(type_name: impl Into<String>, pk: impl Into<Pk>) -> Self {
        Self {
            type_name: type_name.into(),
            pk: pk.into(),
            entity: None,
        }
    }

    pub fn with_entity(type_name: impl Into<String>, pk: impl Into<Pk>, entity: Arc<E>) -> Self {
        Self {
            type_name: type_name.into(),
            pk: pk.into(),
            entity: Some(entity),
        }
    }
}

/// One resolved instance: the decoded payload, the store key it lives under,
/// and the entity handle when one was provided or loaded (`None` when the
/// payload was served from cache).
#[derive(Debug)]
pub struct InstanceResult<E> {
    pub instance: CachedInstance,
    pub store_key: String,
    pub entity: Option<Arc<E>>,
}

/// An entity whose cached representation must be re-derived asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeferredInvalidation {
    pub type_name: String,
    pub pk: Pk,
    pub version: String,
}

/// How `update_instance` treats entries the store does not currently hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Load from the system of record and rehydrate cold entries.
    Populate,
    /// Leave cold entries cold; only touch entries the store already holds.
    /// Used for deep cascades to bound their cost.
    UpdateOnly,
}

/// The read-through instance cache.
pub struct InstanceCache<E> {
    store: Arc<dyn CacheStore>,
    adapters: AdapterRegistry<E>,
    codecs: CodecRegistry,
    config: CacheConfig,
}

impl<E> std::fmt::Debug for InstanceCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: Send + Sync + 'static> InstanceCache<E> {
    /// Build an engine over a store and a fully-populated adapter registry.
    pub fn new(
        store: Arc<dyn CacheStore>,
        adapters: AdapterRegistry<E>,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        Self::with_codecs(store, adapters, CodecRegistry::default(), config)
    }

    /// Build an engine with application codecs registered next to the
    /// built-ins.
    pub fn with_codecs(
        store: Arc<dyn CacheStore>,
        adapters: AdapterRegistry<E>,
        codecs: CodecRegistry,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            store,
            adapters,
            codecs,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Store key for one cached instance.
    pub fn key_for(&self, version: &str, type_name: &str, pk: &Pk) -> String {
        store_key(&self.config.key_prefix, version, type_name, pk)
    }

    /// Batched read-through.
    ///
    /// Deduplicates the specs by (type, pk), fetches every key in one store
    /// round-trip, loads and serializes misses, and writes every freshly
    /// serialized payload back in one more round-trip. Specs whose entity
    /// cannot be loaded, or whose payload serializes to nothing, are omitted
    /// from the result.
    pub async fn get_instances(
        &self,
        specs: Vec<EntitySpec<E>>,
        version: Option<&str>,
    ) -> Result<HashMap<(String, Pk), InstanceResult<E>>, CacheError> {
        let version = version.unwrap_or(&self.config.default_version);

        let mut seen = HashSet::new();
        let mut work = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.type_name.is_empty() || spec.pk.is_empty() {
                return Err(CacheError::InvalidSpec);
            }
            if seen.insert((spec.type_name.clone(), spec.pk.clone())) {
                let key = self.key_for(version, &spec.type_name, &spec.pk);
                work.push((spec, key));
            }
        }

        let keys: Vec<String> = work.iter().map(|(_, key)| key.clone()).collect();
        let cached = if keys.is_empty() {
            HashMap::new()
        } else {
            self.store.get_many(&keys).await?
        };

        let mut results = HashMap::with_capacity(work.len());
        let mut write_back: HashMap<String, String> = HashMap::new();
        for (spec, key) in work {
            let mut payload = match cached.get(&key) {
                Some(raw) => parse_stored(raw)?,
                None => None,
            };
            let mut entity = spec.entity;

            if payload.as_ref().is_none_or(Payload::is_empty) {
                counter!(METRIC_INSTANCE_MISSES).increment(1);
                let adapter = self
                    .adapters
                    .get(&spec.type_name, version)
                    .ok_or_else(|| CacheError::adapter_not_found(&spec.type_name, version))?;

                if entity.is_none() {
                    let loader = adapter.loader.as_ref().ok_or_else(|| {
                        CacheError::adapter_incomplete(&spec.type_name, version, "loader")
                    })?;
                    entity = loader.load(&spec.pk).await?.map(Arc::new);
                }
                let Some(handle) = entity.as_ref() else {
                    // Entity no longer exists: no output entry, no write-back.
                    continue;
                };

                let serializer = adapter.serializer.as_ref().ok_or_else(|| {
                    CacheError::adapter_incomplete(&spec.type_name, version, "serializer")
                })?;
                payload = match serializer(handle, &self.codecs)? {
                    Some(fresh) if !fresh.is_empty() => {
                        write_back.insert(key.clone(), encode_stored(&fresh)?);
                        debug!(
                            type_name = %spec.type_name,
                            pk = %spec.pk,
                            version,
                            "populated instance from system of record"
                        );
                        Some(fresh)
                    }
                    _ => None,
                };
            } else {
                counter!(METRIC_INSTANCE_HITS).increment(1);
            }

            let Some(payload) = payload else {
                continue;
            };
            let instance = self.codecs.decode_payload(payload)?;
            results.insert(
                (spec.type_name, spec.pk),
                InstanceResult {
                    instance,
                    store_key: key,
                    entity,
                },
            );
        }

        if !write_back.is_empty() {
            self.store.set_many(write_back).await?;
        }

        Ok(results)
    }

    /// Read a single instance, `None` if the entity no longer exists or has
    /// nothing cached.
    pub async fn instance(
        &self,
        type_name: &str,
        pk: impl Into<Pk>,
    ) -> Result<Option<CachedInstance>, CacheError> {
        let pk = pk.into();
        let spec = EntitySpec::new(type_name.to_string(), pk.clone());
        let mut results = self.get_instances(vec![spec], None).await?;
        Ok(results
            .remove(&(type_name.to_string(), pk))
            .map(|result| result.instance))
    }

    /// Synchronize the cache for one entity after a create/update/delete and
    /// compute what else is now stale. Full populate mode.
    ///
    /// The returned deferred invalidations are the caller's to schedule —
    /// typically by handing them to the propagation queue.
    pub async fn update_instance(
        &self,
        type_name: &str,
        pk: &Pk,
        entity: Option<Arc<E>>,
        version: Option<&str>,
    ) -> Result<Vec<DeferredInvalidation>, CacheError> {
        self.update_instance_with_mode(type_name, pk, entity, version, UpdateMode::Populate)
            .await
    }

    /// `update_instance` with an explicit cold-entry policy.
    pub async fn update_instance_with_mode(
        &self,
        type_name: &str,
        pk: &Pk,
        entity: Option<Arc<E>>,
        version: Option<&str>,
        mode: UpdateMode,
    ) -> Result<Vec<DeferredInvalidation>, CacheError> {
        let versions: Vec<String> = match version {
            Some(version) => vec![version.to_string()],
            None => self.config.versions.clone(),
        };

        let mut entity = entity;
        let mut deferred = Vec::new();
        for version in &versions {
            let adapter = self
                .adapters
                .get(type_name, version)
                .ok_or_else(|| CacheError::adapter_not_found(type_name, version))?;
            if adapter.is_passive() {
                continue;
            }

            if entity.is_none()
                && let Some(loader) = adapter.loader.as_ref()
            {
                entity = loader.load(pk).await?.map(Arc::new);
            }

            let invalidated = if let Some(serializer) = adapter.serializer.as_ref() {
                let key = self.key_for(version, type_name, pk);
                let current = match self.store.get(&key).await? {
                    Some(raw) => parse_stored(&raw)?,
                    None => None,
                };

                // In update-only mode a cold entry stays cold: forcing the
                // new payload to nothing makes the comparison a no-op unless
                // the entity was deleted outright.
                let new = if mode == UpdateMode::UpdateOnly && current.is_none() {
                    None
                } else {
                    match entity.as_ref() {
                        Some(handle) => serializer(handle, &self.codecs)?,
                        None => None,
                    }
                };
                let deleted = entity.is_none();

                let invalidate = new != current || deleted;
                if invalidate {
                    match new.as_ref().filter(|payload| !payload.is_empty()) {
                        Some(payload) if !deleted => {
                            self.store.set(&key, encode_stored(payload)?).await?;
                        }
                        _ => {
                            self.store.delete(&key).await?;
                        }
                    }
                    debug!(
                        type_name,
                        pk = %pk,
                        version = %version,
                        deleted,
                        "invalidated cached instance"
                    );
                }
                invalidate
            } else {
                // No cached representation to compare against: cascade
                // conservatively on every update.
                true
            };

            if invalidated
                && let Some(handle) = entity.as_ref()
                && let Some(invalidator) = adapter.invalidator.as_ref()
            {
                for target in invalidator(handle) {
                    match target {
                        InvalidationTarget::Key(key) => {
                            self.store.delete(&key).await?;
                        }
                        InvalidationTarget::Entity {
                            type_name: dependent_type,
                            pk: dependent_pk,
                            immediate: true,
                        } => {
                            let key = self.key_for(version, &dependent_type, &dependent_pk);
                            self.store.delete(&key).await?;
                        }
                        InvalidationTarget::Entity {
                            type_name: dependent_type,
                            pk: dependent_pk,
                            immediate: false,
                        } => {
                            deferred.push(DeferredInvalidation {
                                type_name: dependent_type,
                                pk: dependent_pk,
                                version: version.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(deferred)
    }
}

/// Parse a stored raw value. `null` and absent both mean "nothing cached";
/// anything unparseable is a corrupt entry and fails loudly.
fn parse_stored(raw: &str) -> Result<Option<Payload>, CacheError> {
    serde_json::from_str(raw)
        .map_err(|err| CacheError::decode(format!("unparseable stored payload: {err}")))
}

fn encode_stored(payload: &Payload) -> Result<String, CacheError> {
    serde_json::to_string(payload).map_err(|err| CacheError::Payload(err.to_string()))
}
