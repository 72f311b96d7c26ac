//! Cache store adapter.
//!
//! A key-value cache with per-entry TTL, used by the repository for list
//! reads. Keys are namespaced per entity type so that one flush clears
//! exactly one namespace.
//!
//! # Backends
//!
//! - [`LmdbCacheStore`]: persistent, memory-mapped, shared by the process
//! - [`InMemoryCacheStore`]: process-local, instrumented for tests

pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use key::{CacheKey, CachePrefix};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory::{CacheCallSnapshot, InMemoryCacheStore};
pub use traits::{CacheStats, CacheStore, CacheStoreExt, ListEnvelope};

#[cfg(test)]
pub use traits::MockCacheStore;
