//! Per-type adapter registration.
//!
//! For each (entity type, cache version) the embedding application registers
//! a `ModelAdapter`: an optional loader, serializer, and invalidator. The
//! registry is built once at startup and handed to the engine; it is
//! immutable afterwards.
//!
//! An adapter with none of the three functions is a valid registration: the
//! type participates in invalidation targeting only, and the engine skips it
//! during updates.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::codec::{CodecRegistry, Payload};
use crate::error::CacheError;
use crate::keys::Pk;

/// Fetch an entity from the system of record.
///
/// Returning `Ok(None)` means the entity does not exist (deleted); it is a
/// normal signal, not an error.
#[async_trait]
pub trait EntityLoader<E>: Send + Sync {
    async fn load(&self, pk: &Pk) -> Result<Option<E>, CacheError>;
}

/// Serialize an entity into its encoded cache payload.
///
/// `None` means "nothing to cache" for this entity. The codec registry is
/// provided so serializers can emit tagged fields.
pub type SerializeFn<E> =
    Box<dyn Fn(&E, &CodecRegistry) -> Result<Option<Payload>, CacheError> + Send + Sync>;

/// Derive the invalidation targets affected by a change to an entity.
pub type InvalidateFn<E> = Box<dyn Fn(&E) -> Vec<InvalidationTarget> + Send + Sync>;

/// A unit of "this cached thing may now be wrong".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationTarget {
    /// An opaque store key to delete immediately. No cascading.
    Key(String),
    /// Another entity whose cached representation is stale. Immediate targets
    /// are deleted from the store now; deferred targets are re-derived
    /// asynchronously.
    Entity {
        type_name: String,
        pk: Pk,
        immediate: bool,
    },
}

impl InvalidationTarget {
    /// Delete an opaque store key immediately.
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    /// Defer re-derivation of another entity's cache entry.
    pub fn entity(type_name: impl Into<String>, pk: impl Into<Pk>) -> Self {
        Self::Entity {
            type_name: type_name.into(),
            pk: pk.into(),
            immediate: false,
        }
    }

    /// Delete another entity's cache entry immediately, without re-deriving.
    pub fn entity_now(type_name: impl Into<String>, pk: impl Into<Pk>) -> Self {
        Self::Entity {
            type_name: type_name.into(),
            pk: pk.into(),
            immediate: true,
        }
    }
}

/// The loader/serializer/invalidator bundle for one (type, version).
pub struct ModelAdapter<E> {
    pub(crate) loader: Option<Box<dyn EntityLoader<E>>>,
    pub(crate) serializer: Option<SerializeFn<E>>,
    pub(crate) invalidator: Option<InvalidateFn<E>>,
}

impl<E> Default for ModelAdapter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ModelAdapter<E> {
    pub fn new() -> Self {
        Self {
            loader: None,
            serializer: None,
            invalidator: None,
        }
    }

    pub fn with_loader(mut self, loader: impl EntityLoader<E> + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn with_serializer(
        mut self,
        serializer: impl Fn(&E, &CodecRegistry) -> Result<Option<Payload>, CacheError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.serializer = Some(Box::new(serializer));
        self
    }

    pub fn with_invalidator(
        mut self,
        invalidator: impl Fn(&E) -> Vec<InvalidationTarget> + Send + Sync + 'static,
    ) -> Self {
        self.invalidator = Some(Box::new(invalidator));
        self
    }

    /// An adapter with no functions at all: the opt-out registration.
    pub(crate) fn is_passive(&self) -> bool {
        self.loader.is_none() && self.serializer.is_none() && self.invalidator.is_none()
    }
}

/// All registered adapters, keyed by (type name, version).
pub struct AdapterRegistry<E> {
    adapters: HashMap<(String, String), ModelAdapter<E>>,
}

impl<E> Default for AdapterRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> AdapterRegistry<E> {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter for one (type, version). Replaces any previous
    /// registration for the same pair.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        version: impl Into<String>,
        adapter: ModelAdapter<E>,
    ) {
        self.adapters
            .insert((type_name.into(), version.into()), adapter);
    }

    pub fn contains(&self, type_name: &str, version: &str) -> bool {
        self.adapters
            .contains_key(&(type_name.to_string(), version.to_string()))
    }

    pub(crate) fn get(&self, type_name: &str, version: &str) -> Option<&ModelAdapter<E>> {
        self.adapters
            .get(&(type_name.to_string(), version.to_string()))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopLoader;

    #[async_trait]
    impl EntityLoader<u32> for NoopLoader {
        async fn load(&self, _pk: &Pk) -> Result<Option<u32>, CacheError> {
            Ok(None)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry: AdapterRegistry<u32> = AdapterRegistry::new();
        registry.register("User", "v1", ModelAdapter::new().with_loader(NoopLoader));

        assert!(registry.contains("User", "v1"));
        assert!(!registry.contains("User", "v2"));
        assert!(!registry.contains("Group", "v1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_adapter_is_passive() {
        let adapter: ModelAdapter<u32> = ModelAdapter::new();
        assert!(adapter.is_passive());

        let adapter = ModelAdapter::new().with_invalidator(|_: &u32| Vec::new());
        assert!(!adapter.is_passive());
    }

    #[test]
    fn target_constructors() {
        assert_eq!(
            InvalidationTarget::key("user_count"),
            InvalidationTarget::Key("user_count".to_string())
        );
        assert_eq!(
            InvalidationTarget::entity("User", 1),
            InvalidationTarget::Entity {
                type_name: "User".to_string(),
                pk: Pk::Int(1),
                immediate: false,
            }
        );
        assert_eq!(
            InvalidationTarget::entity_now("User", 1),
            InvalidationTarget::Entity {
                type_name: "User".to_string(),
                pk: Pk::Int(1),
                immediate: true,
            }
        );
    }
}
