//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a persistent,
//! memory-mapped key-value cache shared by every request in the process.
//!
//! # Value Layout
//!
//! `[expires_at: 8 bytes, i64 millis LE][payload]`
//!
//! Expiry is lazy: an expired entry is dropped by the first `get` that sees it.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use alpaca_core::{AlpacaError, AlpacaResult, CacheError};
use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::key::{CacheKey, CachePrefix};
use super::traits::{CacheStats, CacheStore};

/// Length of the expiry header in front of every stored value.
const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry for key {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for AlpacaError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Transaction(reason) => CacheError::Transaction { reason }.into(),
            LmdbCacheError::Corrupt(key) => CacheError::Deserialization {
                reason: format!("corrupt entry for key {key}"),
            }
            .into(),
            other => CacheError::Unavailable {
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed [`CacheStore`].
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbCacheStore {
    /// Open (or create) a cache store.
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        let rtxn = env.read_txn().map_err(txn_err)?;
        let entry_count = db.len(&rtxn).map_err(txn_err)?;
        drop(rtxn);

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats {
                entry_count,
                ..CacheStats::default()
            })),
        })
    }

    /// Flush dirty pages to disk. Called on shutdown.
    pub fn sync(&self) -> Result<(), LmdbCacheError> {
        self.env.force_sync().map_err(txn_err)
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, _) = result.map_err(txn_err)?;
            if key.starts_with(prefix) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn delete_raw(&self, key: &[u8]) -> Result<Option<usize>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let size = self.db.get(&wtxn, key).map_err(txn_err)?.map(<[u8]>::len);
        if size.is_some() {
            self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(size)
    }

    fn forget_entry(&self, size: usize) {
        self.record(|s| {
            s.entry_count = s.entry_count.saturating_sub(1);
            s.memory_bytes = s.memory_bytes.saturating_sub(size as u64);
        });
    }
}

fn split_entry(encoded_key: &str, bytes: &[u8]) -> Result<(i64, Vec<u8>), LmdbCacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbCacheError::Corrupt(encoded_key.to_string()));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    let mut expiry = [0u8; HEADER_LEN];
    expiry.copy_from_slice(header);
    Ok((i64::from_le_bytes(expiry), payload.to_vec()))
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &CacheKey) -> AlpacaResult<Option<Vec<u8>>> {
        let encoded_key = key.encode();

        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let entry = match self.db.get(&rtxn, encoded_key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => Some(split_entry(&encoded_key, bytes)?),
            None => None,
        };
        drop(rtxn);

        match entry {
            Some((expires_at, _)) if expires_at <= Utc::now().timestamp_millis() => {
                if let Some(size) = self.delete_raw(encoded_key.as_bytes())? {
                    self.forget_entry(size);
                    self.record(|s| s.expirations += 1);
                }
                self.record(|s| s.misses += 1);
                Ok(None)
            }
            Some((_, payload)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(payload))
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> AlpacaResult<()> {
        let encoded_key = key.encode();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let mut full_bytes = Vec::with_capacity(HEADER_LEN + value.len());
        full_bytes.extend_from_slice(&expires_at.to_le_bytes());
        full_bytes.extend_from_slice(&value);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let previous = self
            .db
            .get(&wtxn, encoded_key.as_bytes())
            .map_err(txn_err)?
            .map(<[u8]>::len);
        self.db
            .put(&mut wtxn, encoded_key.as_bytes(), &full_bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        let size = full_bytes.len() as u64;
        self.record(|s| match previous {
            Some(old) => {
                s.memory_bytes = s.memory_bytes.saturating_sub(old as u64) + size;
            }
            None => {
                s.entry_count += 1;
                s.memory_bytes += size;
            }
        });
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> AlpacaResult<()> {
        let encoded_key = key.encode();
        match self.delete_raw(encoded_key.as_bytes())? {
            Some(size) => {
                self.forget_entry(size);
                Ok(())
            }
            None => Err(CacheError::KeyNotFound { key: encoded_key }.into()),
        }
    }

    async fn flush_prefix(&self, prefix: &CachePrefix) -> AlpacaResult<u64> {
        let keys = self.collect_keys_with_prefix(prefix.encode().as_bytes())?;

        // One write transaction per key: a concurrent set may land between
        // deletions and survive the flush.
        let mut deleted = 0u64;
        for key in &keys {
            if let Some(size) = self.delete_raw(key)? {
                self.forget_entry(size);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn stats(&self) -> AlpacaResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
