//! Cache store traits.
//!
//! [`CacheStore`] is the byte-level adapter each backend implements.
//! [`CacheStoreExt`] layers typed scalar and list-envelope access on top of
//! any store, including `dyn CacheStore`.

use std::time::Duration;

use alpaca_core::{AlpacaResult, CacheError};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::key::{CacheKey, CachePrefix};

/// Key-value cache with per-entry TTL.
///
/// Backend failures are returned as errors and never swallowed here. Callers
/// decide whether a failure is a miss.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Raw value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &CacheKey) -> AlpacaResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> AlpacaResult<()>;

    /// Remove `key`. Fails with [`CacheError::KeyNotFound`] when absent.
    async fn delete(&self, key: &CacheKey) -> AlpacaResult<()>;

    /// Delete every key under `prefix`, one at a time. Not atomic.
    ///
    /// Returns the number of keys removed.
    async fn flush_prefix(&self, prefix: &CachePrefix) -> AlpacaResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> AlpacaResult<CacheStats>;
}

/// Cached page of a list read: the page itself plus the unpaginated total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEnvelope<T> {
    pub total: u64,
    pub items: Vec<T>,
}

/// Typed access over a [`CacheStore`], JSON encoded.
#[async_trait]
pub trait CacheStoreExt: CacheStore {
    async fn get_value<T>(&self, key: &CacheKey) -> AlpacaResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CacheError::Deserialization {
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }

    async fn set_value<T>(&self, key: &CacheKey, value: &T, ttl: Duration) -> AlpacaResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        self.set(key, bytes, ttl).await
    }

    /// `(total, items)` for a cached list read.
    async fn get_list<T>(&self, key: &CacheKey) -> AlpacaResult<Option<(u64, Vec<T>)>>
    where
        T: DeserializeOwned + Send,
    {
        Ok(self
            .get_value::<ListEnvelope<T>>(key)
            .await?
            .map(|envelope| (envelope.total, envelope.items)))
    }

    async fn set_list<T>(
        &self,
        key: &CacheKey,
        total: u64,
        items: &[T],
        ttl: Duration,
    ) -> AlpacaResult<()>
    where
        T: Serialize + Sync,
    {
        #[derive(Serialize)]
        struct Borrowed<'a, T> {
            total: u64,
            items: &'a [T],
        }
        self.set_value(key, &Borrowed { total, items }, ttl).await
    }
}

impl<S: CacheStore + ?Sized> CacheStoreExt for S {}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate storage used by entries, in bytes.
    pub memory_bytes: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpaca_core::{AlpacaError, EntityType};

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_get_list_decodes_envelope() {
        let mut mock = MockCacheStore::new();
        mock.expect_get().returning(|_| {
            Ok(Some(
                serde_json::to_vec(&ListEnvelope {
                    total: 7,
                    items: vec!["a".to_string(), "b".to_string()],
                })
                .unwrap(),
            ))
        });

        let key = CacheKey::new(EntityType::InstructionRecord, "fp");
        let (total, items) = mock
            .get_list::<String>(&key)
            .await
            .expect("get_list should succeed")
            .expect("entry should be present");
        assert_eq!(total, 7);
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_get_list_reports_corrupt_entry() {
        let mut mock = MockCacheStore::new();
        mock.expect_get()
            .returning(|_| Ok(Some(b"not json".to_vec())));

        let key = CacheKey::new(EntityType::InstructionRecord, "fp");
        let err = mock.get_list::<String>(&key).await.unwrap_err();
        assert!(matches!(
            err,
            AlpacaError::Cache(CacheError::Deserialization { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_list_writes_envelope_with_ttl() {
        let mut mock = MockCacheStore::new();
        mock.expect_set()
            .withf(|key, value, ttl| {
                let envelope: ListEnvelope<u32> = serde_json::from_slice(value).unwrap();
                key.identity() == "fp"
                    && envelope.total == 10
                    && envelope.items == vec![1, 2]
                    && *ttl == Duration::from_secs(60)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let key = CacheKey::new(EntityType::InstructionRecord, "fp");
        mock.set_list(&key, 10, &[1u32, 2], Duration::from_secs(60))
            .await
            .expect("set_list should succeed");
    }
}
