//! In-memory document store and user directory.
//!
//! Each operation takes the map lock once, so every write is atomic with
//! respect to concurrent readers and writers.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use alpaca_core::{
    AlpacaResult, EntityType, GroupField, InstructionRecord, ListQuery, RecordFilter, RecordId,
    RecordUpdate, SortOrder, StatusCode, StorageError, Timestamp, UserAccount, UserId, UserQuery,
};
use async_trait::async_trait;

use super::{InstructionStore, UserDirectory};

/// In-memory [`InstructionStore`].
#[derive(Debug, Default)]
pub struct InMemoryInstructionStore {
    records: Arc<RwLock<HashMap<RecordId, InstructionRecord>>>,
    reads: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryInstructionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read queries served so far (get, list, count, aggregate).
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every operation fail with [`StorageError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stored record regardless of visibility.
    pub fn raw(&self, id: RecordId) -> Option<InstructionRecord> {
        self.records.read().ok()?.get(&id).cloned()
    }

    /// Number of stored records, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> AlpacaResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "in-memory store marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn read(&self) -> AlpacaResult<RwLockReadGuard<'_, HashMap<RecordId, InstructionRecord>>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.read().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn write(&self) -> AlpacaResult<RwLockWriteGuard<'_, HashMap<RecordId, InstructionRecord>>> {
        self.check_available()?;
        Ok(self.records.write().map_err(|_| StorageError::LockPoisoned)?)
    }
}

fn visible_matching<'a>(
    records: &'a HashMap<RecordId, InstructionRecord>,
    filter: &'a RecordFilter,
) -> impl Iterator<Item = &'a InstructionRecord> + 'a {
    records
        .values()
        .filter(move |r| r.is_visible() && filter.matches(r))
}

fn creation_order(a: &InstructionRecord, b: &InstructionRecord) -> CmpOrdering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.record_id.cmp(&b.record_id))
}

fn group_value(record: &InstructionRecord, group: GroupField) -> String {
    match group {
        GroupField::Theme => record.theme.clone(),
        GroupField::StatusCode => record.status.code.as_db_str().to_string(),
        GroupField::OwnerId => record.owner_id.to_string(),
        GroupField::Source => record.source.clone(),
    }
}

#[async_trait]
impl InstructionStore for InMemoryInstructionStore {
    async fn find_by_id(&self, id: RecordId) -> AlpacaResult<Option<InstructionRecord>> {
        let records = self.read()?;
        Ok(records.get(&id).filter(|r| r.is_visible()).cloned())
    }

    async fn find(&self, query: &ListQuery) -> AlpacaResult<(Vec<InstructionRecord>, u64)> {
        let records = self.read()?;
        let mut matching: Vec<&InstructionRecord> =
            visible_matching(&records, &query.filter).collect();
        matching.sort_by(|a, b| match query.sort {
            SortOrder::Asc => creation_order(a, b),
            SortOrder::Desc => creation_order(b, a),
        });

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn count(&self, filter: &RecordFilter) -> AlpacaResult<u64> {
        let records = self.read()?;
        Ok(visible_matching(&records, filter).count() as u64)
    }

    async fn aggregate_count(
        &self,
        group: GroupField,
        filter: &RecordFilter,
    ) -> AlpacaResult<BTreeMap<String, u64>> {
        let records = self.read()?;
        let mut counts = BTreeMap::new();
        for record in visible_matching(&records, filter) {
            *counts.entry(group_value(record, group)).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn insert(&self, record: &InstructionRecord) -> AlpacaResult<()> {
        let mut records = self.write()?;
        if records.contains_key(&record.record_id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::InstructionRecord,
                reason: "already exists".to_string(),
            }
            .into());
        }
        records.insert(record.record_id, record.clone());
        Ok(())
    }

    async fn update(
        &self,
        id: RecordId,
        update: &RecordUpdate,
        now: Timestamp,
    ) -> AlpacaResult<Option<InstructionRecord>> {
        let mut records = self.write()?;
        match records.get_mut(&id) {
            Some(record) if record.is_visible() && update.precondition_holds(record) => {
                update.apply(record, now);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn soft_delete(
        &self,
        id: RecordId,
        expected_status: Option<StatusCode>,
        now: Timestamp,
    ) -> AlpacaResult<bool> {
        let mut records = self.write()?;
        match records.get_mut(&id) {
            Some(record)
                if record.is_visible()
                    && expected_status.is_none_or(|code| record.status.code == code) =>
            {
                record.deleted = true;
                record.deleted_at = Some(now);
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hard_delete(&self, id: RecordId) -> AlpacaResult<bool> {
        let mut records = self.write()?;
        Ok(records.remove(&id).is_some())
    }

    async fn hard_delete_matching(&self, filter: &RecordFilter) -> AlpacaResult<u64> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|_, r| !(r.is_visible() && filter.matches(r)));
        Ok((before - records.len()) as u64)
    }

    async fn purge_deleted_before(&self, cutoff: Timestamp) -> AlpacaResult<u64> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|_, r| !(r.deleted && r.deleted_at.is_some_and(|at| at < cutoff)));
        Ok((before - records.len()) as u64)
    }
}

/// In-memory [`UserDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, UserAccount>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user account.
    pub fn upsert(&self, user: UserAccount) -> AlpacaResult<()> {
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        users.insert(user.user_id, user);
        Ok(())
    }

    /// Change the username of an existing account.
    pub fn rename(&self, id: UserId, username: impl Into<String>) -> AlpacaResult<()> {
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        let user = users.get_mut(&id).ok_or(StorageError::NotFound {
            entity_type: EntityType::User,
            id,
        })?;
        user.username = username.into();
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, id: UserId) -> AlpacaResult<Option<UserAccount>> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(users.get(&id).cloned())
    }

    async fn list(&self, query: &UserQuery) -> AlpacaResult<(Vec<UserAccount>, u64)> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut matching: Vec<&UserAccount> = users.values().filter(|u| query.matches(u)).collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(query.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(query.limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((page, total))
    }
}

// ============================================================================
// TESTS
// ============================================================================
