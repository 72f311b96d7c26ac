//! Instruction-data repository.
//!
//! Owns the record collection. List reads go through the cache; counts and
//! aggregates always hit the store. Every successful write flushes the whole
//! record namespace of the cache.
//!
//! A list read racing a write can repopulate the cache with the pre-write
//! page after the flush. That entry lives until the next write or its TTL.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alpaca_core::{
    new_entity_id, AlpacaError, AlpacaResult, EntityType, GroupField, InstructionRecord,
    ListQuery, NewRecord, RecordFilter, RecordId, RecordUpdate, StatusCode, StorageError,
    Timestamp, UserAccount, UserId, UserQuery,
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CachePrefix, CacheStats, CacheStore, CacheStoreExt};
use crate::store::{InstructionStore, UserDirectory};

/// Cache-aside repository over an [`InstructionStore`].
#[derive(Clone)]
pub struct InstructionRepository {
    store: Arc<dyn InstructionStore>,
    cache: Arc<dyn CacheStore>,
    users: Arc<dyn UserDirectory>,
    list_ttl: Duration,
}

impl InstructionRepository {
    pub fn new(
        store: Arc<dyn InstructionStore>,
        cache: Arc<dyn CacheStore>,
        users: Arc<dyn UserDirectory>,
        list_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            users,
            list_ttl,
        }
    }

    fn not_found(id: RecordId) -> StorageError {
        StorageError::NotFound {
            entity_type: EntityType::InstructionRecord,
            id,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Visible record by id.
    pub async fn get_by_id(&self, id: RecordId) -> AlpacaResult<InstructionRecord> {
        debug!(record_id = %id, "get record");
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| Self::not_found(id).into())
    }

    /// One page of visible records plus the unpaginated total.
    ///
    /// Served from the cache when an envelope for the same query exists.
    /// Cache failures are logged and treated as misses.
    pub async fn list(&self, query: &ListQuery) -> AlpacaResult<(Vec<InstructionRecord>, u64)> {
        let key = CacheKey::for_list(query);

        match self.cache.get_list::<InstructionRecord>(&key).await {
            Ok(Some((total, items))) => {
                debug!(fingerprint = key.identity(), total, "list cache hit");
                return Ok((items, total));
            }
            Ok(None) => debug!(fingerprint = key.identity(), "list cache miss"),
            Err(e) => warn!(error = %e, fingerprint = key.identity(), "list cache read failed"),
        }

        let (items, total) = self.store.find(query).await?;

        if let Err(e) = self
            .cache
            .set_list(&key, total, &items, self.list_ttl)
            .await
        {
            warn!(error = %e, fingerprint = key.identity(), "list cache populate failed");
        }

        Ok((items, total))
    }

    /// Exact count. Never cached.
    pub async fn count(&self, filter: &RecordFilter) -> AlpacaResult<u64> {
        self.store.count(filter).await
    }

    /// Count per distinct value of `group`. Never cached.
    pub async fn aggregate_count(
        &self,
        group: GroupField,
        filter: &RecordFilter,
    ) -> AlpacaResult<BTreeMap<String, u64>> {
        self.store.aggregate_count(group, filter).await
    }

    pub async fn user(&self, id: UserId) -> AlpacaResult<UserAccount> {
        self.users.get(id).await?.ok_or_else(|| {
            StorageError::NotFound {
                entity_type: EntityType::User,
                id,
            }
            .into()
        })
    }

    pub async fn list_users(&self, query: &UserQuery) -> AlpacaResult<(Vec<UserAccount>, u64)> {
        self.users.list(query).await
    }

    pub async fn cache_stats(&self) -> AlpacaResult<CacheStats> {
        self.cache.stats().await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a record with a fresh id and both timestamps set to now.
    pub async fn insert(&self, new: NewRecord) -> AlpacaResult<InstructionRecord> {
        let now = Utc::now();
        let record = InstructionRecord {
            record_id: new_entity_id(),
            owner_id: new.owner_id,
            username: new.username,
            instruction: new.instruction,
            input: new.input,
            output: new.output,
            theme: new.theme,
            source: new.source,
            note: new.note,
            status: new.status,
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let store = Arc::clone(&self.store);
        let stored = record.clone();
        self.commit(async move { store.insert(&stored).await.map(|()| ((), true)) })
            .await?;
        debug!(record_id = %record.record_id, owner_id = %record.owner_id, "record inserted");
        Ok(record)
    }

    /// Apply a partial update to a visible record.
    ///
    /// Reassigning the owner rewrites the username snapshot from the new
    /// owner's account. A failed `expected_status` precondition surfaces as
    /// [`StorageError::StateConflict`].
    pub async fn update(
        &self,
        id: RecordId,
        mut update: RecordUpdate,
    ) -> AlpacaResult<InstructionRecord> {
        if let Some(owner_id) = update.owner_id {
            update.username = Some(self.user(owner_id).await?.username);
        }

        let expected = update.expected_status;
        let store = Arc::clone(&self.store);
        let updated = self
            .commit(async move {
                let updated = store.update(id, &update, Utc::now()).await?;
                let changed = updated.is_some();
                Ok::<_, AlpacaError>((updated, changed))
            })
            .await?;
        match updated {
            Some(record) => {
                debug!(record_id = %id, "record updated");
                Ok(record)
            }
            None => Err(self.explain_miss(id, expected).await),
        }
    }

    /// Mark a visible record deleted. A second call on the same id is
    /// `NotFound`.
    pub async fn soft_delete(
        &self,
        id: RecordId,
        expected_status: Option<StatusCode>,
    ) -> AlpacaResult<()> {
        let store = Arc::clone(&self.store);
        let marked = self
            .commit(async move {
                let marked = store.soft_delete(id, expected_status, Utc::now()).await?;
                Ok::<_, AlpacaError>((marked, marked))
            })
            .await?;
        if marked {
            debug!(record_id = %id, "record soft-deleted");
            Ok(())
        } else {
            Err(self.explain_miss(id, expected_status).await)
        }
    }

    /// Physically remove a record in any state.
    pub async fn hard_delete(&self, id: RecordId) -> AlpacaResult<()> {
        let store = Arc::clone(&self.store);
        let removed = self
            .commit(async move {
                let removed = store.hard_delete(id).await?;
                Ok::<_, AlpacaError>((removed, removed))
            })
            .await?;
        if removed {
            debug!(record_id = %id, "record removed");
            Ok(())
        } else {
            Err(Self::not_found(id).into())
        }
    }

    /// Physically remove every visible record matching `filter`.
    pub async fn hard_delete_matching(&self, filter: &RecordFilter) -> AlpacaResult<u64> {
        let store = Arc::clone(&self.store);
        let filter = filter.clone();
        let removed = self
            .commit(async move {
                Ok::<_, AlpacaError>((store.hard_delete_matching(&filter).await?, true))
            })
            .await?;
        debug!(removed, "records removed by filter");
        Ok(removed)
    }

    /// Physically remove records soft-deleted before `cutoff`.
    pub async fn purge_deleted_before(&self, cutoff: Timestamp) -> AlpacaResult<u64> {
        let store = Arc::clone(&self.store);
        self.commit(async move {
            let purged = store.purge_deleted_before(cutoff).await?;
            Ok::<_, AlpacaError>((purged, purged > 0))
        })
        .await
    }

    /// Run a store write and, when it reports a change, the list flush that
    /// follows it, on a task of their own.
    ///
    /// Dropping the caller (cancellation, deadline) never separates a saved
    /// write from its invalidation: the task finishes both regardless.
    async fn commit<T, F>(&self, write: F) -> AlpacaResult<T>
    where
        T: Send + 'static,
        F: Future<Output = AlpacaResult<(T, bool)>> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let (value, changed) = write.await?;
            if changed {
                invalidate_lists(cache.as_ref()).await;
            }
            Ok::<_, AlpacaError>(value)
        })
        .await
        .map_err(|e| {
            AlpacaError::from(StorageError::Unavailable {
                reason: format!("write task failed: {}", e),
            })
        })?
    }

    /// Work out why a conditional write matched nothing.
    async fn explain_miss(
        &self,
        id: RecordId,
        expected: Option<StatusCode>,
    ) -> AlpacaError {
        match (self.store.find_by_id(id).await, expected) {
            (Ok(Some(current)), Some(expected)) if current.status.code != expected => {
                StorageError::StateConflict {
                    id,
                    expected,
                    actual: current.status.code,
                }
                .into()
            }
            (Err(e), _) => e,
            _ => Self::not_found(id).into(),
        }
    }
}

async fn invalidate_lists(cache: &dyn CacheStore) {
    let prefix = CachePrefix::new(EntityType::InstructionRecord);
    match cache.flush_prefix(&prefix).await {
        Ok(flushed) => debug!(prefix = %prefix, flushed, "list cache flushed"),
        Err(e) => warn!(error = %e, prefix = %prefix, "list cache flush failed"),
    }
}

// ============================================================================
// TESTS
// ============================================================================
