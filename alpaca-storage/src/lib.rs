//! Alpaca Storage - cache store adapter, document store boundary and the
//! instruction-data repository.
//!
//! Layering, leaf first:
//!
//! 1. [`cache`]: key-value cache with per-entry TTL and prefix flush
//! 2. [`store`]: persistence traits plus in-memory implementations
//! 3. [`repository`]: cache-aside reads and write-invalidate over both

pub mod cache;
pub mod repository;
pub mod store;

pub use cache::{
    CacheKey, CachePrefix, CacheStats, CacheStore, CacheStoreExt, InMemoryCacheStore,
    ListEnvelope, LmdbCacheError, LmdbCacheStore,
};
pub use repository::InstructionRepository;
pub use store::{InMemoryInstructionStore, InMemoryUserDirectory, InstructionStore, UserDirectory};
