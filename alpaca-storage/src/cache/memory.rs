//! Process-local cache store.
//!
//! Backs development setups and tests. Call counters make cache traffic
//! observable, [`InMemoryCacheStore::set_unavailable`] simulates an outage
//! and [`InMemoryCacheStore::set_flush_delay`] a slow backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use alpaca_core::{AlpacaResult, CacheError};
use async_trait::async_trait;

use super::key::{CacheKey, CachePrefix};
use super::traits::{CacheStats, CacheStore};

/// Cap for TTLs too large to add to an `Instant`.
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct CacheCallCounts {
    pub get: AtomicU64,
    pub set: AtomicU64,
    pub delete: AtomicU64,
    pub flush: AtomicU64,
}

/// Snapshot of [`CacheCallCounts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheCallSnapshot {
    pub get: u64,
    pub set: u64,
    pub delete: u64,
    pub flush: u64,
}

impl CacheCallCounts {
    pub fn snapshot(&self) -> CacheCallSnapshot {
        CacheCallSnapshot {
            get: self.get.load(Ordering::Relaxed),
            set: self.set.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
            flush: self.flush.load(Ordering::Relaxed),
        }
    }
}

/// In-memory [`CacheStore`] with TTL.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stats: Arc<RwLock<CacheStats>>,
    calls: CacheCallCounts,
    unavailable: AtomicBool,
    flush_delay_ms: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`CacheError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold every `flush_prefix` for `delay` before it deletes anything.
    pub fn set_flush_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.flush_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CacheCallSnapshot {
        self.calls.snapshot()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|e| e.values().filter(|entry| !entry.is_expired()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .map(|e| e.get(&key.encode()).is_some_and(|entry| !entry.is_expired()))
            .unwrap_or(false)
    }

    fn check_available(&self) -> AlpacaResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: "in-memory cache marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn poisoned() -> CacheError {
        CacheError::Unavailable {
            reason: "cache lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> AlpacaResult<Option<Vec<u8>>> {
        self.calls.get.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let encoded_key = key.encode();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let found = entries
            .get(&encoded_key)
            .map(|entry| (entry.is_expired(), entry.value.clone()));
        match found {
            Some((true, _)) => {
                entries.remove(&encoded_key);
                self.record(|s| {
                    s.misses += 1;
                    s.expirations += 1;
                });
                Ok(None)
            }
            Some((false, value)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(value))
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> AlpacaResult<()> {
        self.calls.set.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let expires_at = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(|| Instant::now() + MAX_TTL);
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(key.encode(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> AlpacaResult<()> {
        self.calls.delete.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let encoded_key = key.encode();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        match entries.remove(&encoded_key) {
            Some(entry) if !entry.is_expired() => Ok(()),
            _ => Err(CacheError::KeyNotFound { key: encoded_key }.into()),
        }
    }

    async fn flush_prefix(&self, prefix: &CachePrefix) -> AlpacaResult<u64> {
        self.calls.flush.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let delay = self.flush_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let keys: Vec<String> = {
            let entries = self.entries.read().map_err(|_| Self::poisoned())?;
            entries
                .keys()
                .filter(|k| prefix.matches(k))
                .cloned()
                .collect()
        };

        let mut deleted = 0u64;
        for key in keys {
            let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
            if entries.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn stats(&self) -> AlpacaResult<CacheStats> {
        self.check_available()?;
        let (entry_count, memory_bytes) = {
            let entries = self.entries.read().map_err(|_| Self::poisoned())?;
            (
                entries.len() as u64,
                entries
                    .iter()
                    .map(|(k, e)| (k.len() + e.value.len()) as u64)
                    .sum(),
            )
        };
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpaca_core::{AlpacaError, EntityType};

    fn key(identity: &str) -> CacheKey {
        CacheKey::new(EntityType::InstructionRecord, identity)
    }

    #[tokio::test]
    async fn test_set_get_counts_calls() {
        let store = InMemoryCacheStore::new();
        store
            .set(&key("a"), vec![1, 2], Duration::from_secs(60))
            .await
            .expect("set should succeed");
        assert_eq!(
            store.get(&key("a")).await.expect("get should succeed"),
            Some(vec![1, 2])
        );
        assert_eq!(store.get(&key("b")).await.expect("get should succeed"), None);

        let calls = store.calls();
        assert_eq!(calls.get, 2);
        assert_eq!(calls.set, 1);

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_entry_is_never_served() {
        let store = InMemoryCacheStore::new();
        store
            .set(&key("a"), vec![1], Duration::ZERO)
            .await
            .expect("set should succeed");
        assert_eq!(store.get(&key("a")).await.expect("get"), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_key_fails() {
        let store = InMemoryCacheStore::new();
        let err = store.delete(&key("nope")).await.unwrap_err();
        assert!(matches!(
            err,
            AlpacaError::Cache(CacheError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_flush_prefix_counts_deleted_keys() {
        let store = InMemoryCacheStore::new();
        let ttl = Duration::from_secs(60);
        store.set(&key("a"), vec![], ttl).await.expect("set");
        store.set(&key("b"), vec![], ttl).await.expect("set");
        let user_key = CacheKey::new(EntityType::User, "u");
        store.set(&user_key, vec![], ttl).await.expect("set");

        let deleted = store
            .flush_prefix(&CachePrefix::new(EntityType::InstructionRecord))
            .await
            .expect("flush should succeed");
        assert_eq!(deleted, 2);
        assert!(store.contains(&user_key));
        assert!(!store.contains(&key("a")));
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_errors() {
        let store = InMemoryCacheStore::new();
        store.set_unavailable(true);
        let err = store.get(&key("a")).await.unwrap_err();
        assert!(matches!(
            err,
            AlpacaError::Cache(CacheError::Unavailable { .. })
        ));
        assert!(store
            .set(&key("a"), vec![], Duration::from_secs(1))
            .await
            .is_err());

        store.set_unavailable(false);
        assert!(store.get(&key("a")).await.is_ok());
    }
}
