//! Document store boundary.
//!
//! The repository talks to persistence only through these traits. Every read
//! excludes soft-deleted records; callers never see `deleted = true`.

use std::collections::BTreeMap;

use alpaca_core::{
    AlpacaResult, GroupField, InstructionRecord, ListQuery, RecordFilter, RecordId, RecordUpdate,
    StatusCode, Timestamp, UserAccount, UserId, UserQuery,
};
use async_trait::async_trait;

pub mod memory;

pub use memory::{InMemoryInstructionStore, InMemoryUserDirectory};

/// Persistence for instruction records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstructionStore: Send + Sync {
    /// Visible record by id.
    async fn find_by_id(&self, id: RecordId) -> AlpacaResult<Option<InstructionRecord>>;

    /// One page of visible records plus the unpaginated total.
    async fn find(&self, query: &ListQuery) -> AlpacaResult<(Vec<InstructionRecord>, u64)>;

    /// Exact count of visible records matching `filter`.
    async fn count(&self, filter: &RecordFilter) -> AlpacaResult<u64>;

    /// Visible records matching `filter`, counted per distinct value of `group`.
    async fn aggregate_count(
        &self,
        group: GroupField,
        filter: &RecordFilter,
    ) -> AlpacaResult<BTreeMap<String, u64>>;

    async fn insert(&self, record: &InstructionRecord) -> AlpacaResult<()>;

    /// Apply `update` to the visible record `id` in a single write.
    ///
    /// Returns `None` when no visible record matched, including when
    /// `update.expected_status` did not hold.
    async fn update(
        &self,
        id: RecordId,
        update: &RecordUpdate,
        now: Timestamp,
    ) -> AlpacaResult<Option<InstructionRecord>>;

    /// Mark the visible record `id` deleted, optionally only if its status
    /// code is `expected_status`. Returns whether a record was marked.
    async fn soft_delete(
        &self,
        id: RecordId,
        expected_status: Option<StatusCode>,
        now: Timestamp,
    ) -> AlpacaResult<bool>;

    /// Physically remove `id` whatever its state.
    async fn hard_delete(&self, id: RecordId) -> AlpacaResult<bool>;

    /// Physically remove every visible record matching `filter`.
    async fn hard_delete_matching(&self, filter: &RecordFilter) -> AlpacaResult<u64>;

    /// Physically remove records soft-deleted before `cutoff`.
    async fn purge_deleted_before(&self, cutoff: Timestamp) -> AlpacaResult<u64>;
}

/// Read-only view of user accounts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: UserId) -> AlpacaResult<Option<UserAccount>>;

    /// One page of matching users plus the unpaginated total.
    async fn list(&self, query: &UserQuery) -> AlpacaResult<(Vec<UserAccount>, u64)>;
}
