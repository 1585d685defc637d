//! Strato — read-through instance cache with dependency-driven invalidation.
//!
//! Entities are cached one payload per (type, primary key, cache version),
//! populated lazily from application-supplied loaders and serializers. A
//! write to one entity computes the set of *other* entities whose cached
//! representation is now stale; those are deleted immediately or re-derived
//! asynchronously through a propagation queue, cascading recursively until
//! the dependency graph is exhausted. The store is cached truth only — the
//! system of record stays authoritative, and correctness is eventual.
//!
//! ## Wiring
//!
//! ```ignore
//! let mut adapters = AdapterRegistry::new();
//! adapters.register("User", "v1", ModelAdapter::new()
//!     .with_loader(UserLoader { db })
//!     .with_serializer(serialize_user)
//!     .with_invalidator(user_dependents));
//!
//! let cache = Arc::new(InstanceCache::new(store, adapters, config)?);
//! let (queue, worker) = PropagationWorker::new(cache.clone());
//! worker.spawn();
//!
//! // after a save:
//! queue.submit("User", user.id);
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! key_prefix = "strato"
//! versions = ["v1"]
//! default_version = "v1"
//! populate_cold = true
//! memory_entry_limit = 10000
//! ```

pub mod adapter;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod instances;
pub mod keys;
mod lock;
pub mod store;
pub mod worker;

pub use adapter::{AdapterRegistry, EntityLoader, InvalidationTarget, ModelAdapter};
pub use codec::{CodecRegistry, FieldCodec, FieldValue, Payload};
pub use config::CacheConfig;
pub use engine::{
    DeferredInvalidation, EntitySpec, InstanceCache, InstanceResult, UpdateMode,
};
pub use error::{CacheError, StoreError};
pub use instances::{CachedInstance, EntityRef, EntityRefList};
pub use keys::{Pk, store_key};
pub use store::{CacheStore, MemoryStore};
pub use worker::{PropagationJob, PropagationQueue, PropagationWorker};
