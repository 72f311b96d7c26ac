//! Alpaca Test Utilities
//!
//! Shared test infrastructure for the Alpaca workspace:
//! - Proptest generators for records, filters and queries
//! - Fixtures, including an in-memory harness wiring store, cache, user
//!   directory and repository together
//! - Assertions for Alpaca error variants

use std::sync::Arc;
use std::time::Duration;

use alpaca_core::{
    new_entity_id, AlpacaError, AlpacaResult, EntityType, InstructionRecord, ListQuery,
    NewRecord, RecordFilter, RecordStatus, Role, SortOrder, StatusCode, StorageError, Timestamp,
    UserAccount, UserId,
};
use alpaca_storage::{
    InMemoryCacheStore, InMemoryInstructionStore, InMemoryUserDirectory, InstructionRepository,
    InstructionStore,
};
use chrono::Utc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Alpaca types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_status_code() -> impl Strategy<Value = StatusCode> {
        prop_oneof![
            Just(StatusCode::Pending),
            Just(StatusCode::Approved),
            Just(StatusCode::Rejected),
        ]
    }

    /// A status with a message only when rejected.
    pub fn arb_status() -> impl Strategy<Value = RecordStatus> {
        (arb_status_code(), "[a-z ]{1,20}").prop_map(|(code, message)| match code {
            StatusCode::Pending => RecordStatus::pending(),
            StatusCode::Approved => RecordStatus::approved(),
            StatusCode::Rejected => RecordStatus::rejected(message),
        })
    }

    /// One of a small set of themes, so that generated records collide.
    pub fn arb_theme() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("math".to_string()),
            Just("poetry".to_string()),
            Just("code".to_string()),
            Just("default".to_string()),
        ]
    }

    /// Free text of a few lowercase words.
    pub fn arb_text() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,6}", 1..5).prop_map(|words| words.join(" "))
    }

    pub fn arb_new_record(owner: UserAccount) -> impl Strategy<Value = NewRecord> {
        (
            arb_text(),
            prop::option::of(arb_text()),
            arb_text(),
            arb_theme(),
            arb_text(),
        )
            .prop_map(move |(instruction, input, output, theme, source)| NewRecord {
                owner_id: owner.user_id,
                username: owner.username.clone(),
                instruction,
                input: input.unwrap_or_default(),
                output,
                theme,
                source,
                note: None,
                status: RecordStatus::pending(),
            })
    }

    /// A fully formed, visible record owned by one of `owners`.
    pub fn arb_record(owners: Vec<UserId>) -> impl Strategy<Value = InstructionRecord> {
        (
            prop::sample::select(owners),
            arb_text(),
            arb_text(),
            arb_theme(),
            arb_status(),
            arb_timestamp(),
        )
            .prop_map(|(owner_id, instruction, output, theme, status, created_at)| {
                InstructionRecord {
                    record_id: new_entity_id(),
                    owner_id,
                    username: "generated".to_string(),
                    instruction,
                    input: String::new(),
                    output,
                    theme,
                    source: "generated".to_string(),
                    note: None,
                    status,
                    deleted: false,
                    deleted_at: None,
                    created_at,
                    updated_at: created_at,
                }
            })
    }

    pub fn arb_record_filter() -> impl Strategy<Value = RecordFilter> {
        (
            prop::option::of(arb_theme()),
            prop::option::of(arb_status_code()),
        )
            .prop_map(|(theme, status_code)| RecordFilter {
                theme,
                status_code,
                ..RecordFilter::default()
            })
    }

    pub fn arb_list_query() -> impl Strategy<Value = ListQuery> {
        (
            arb_record_filter(),
            0u64..5,
            prop::option::of(1u64..10),
            prop_oneof![Just(SortOrder::Asc), Just(SortOrder::Desc)],
        )
            .prop_map(|(filter, offset, limit, sort)| ListQuery {
                offset,
                limit,
                sort,
                filter,
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values and an in-memory stack.

    use super::*;

    /// A user account with a fresh id.
    pub fn account(username: &str, role: Role) -> UserAccount {
        UserAccount {
            user_id: new_entity_id(),
            username: username.to_string(),
            role,
            created_at: Utc::now(),
        }
    }

    /// A minimal valid submission.
    pub fn new_record(owner: &UserAccount, theme: &str) -> NewRecord {
        NewRecord {
            owner_id: owner.user_id,
            username: owner.username.clone(),
            instruction: "Add 1+1".to_string(),
            input: String::new(),
            output: "The answer is 2".to_string(),
            theme: theme.to_string(),
            source: "textbook".to_string(),
            note: None,
            status: RecordStatus::pending(),
        }
    }

    /// A visible record with explicit status and creation time, for seeding
    /// the store directly.
    pub fn record_at(
        owner: &UserAccount,
        theme: &str,
        status: RecordStatus,
        created_at: Timestamp,
    ) -> InstructionRecord {
        InstructionRecord {
            record_id: new_entity_id(),
            owner_id: owner.user_id,
            username: owner.username.clone(),
            instruction: "Translate 'cat'".to_string(),
            input: String::new(),
            output: "chat".to_string(),
            theme: theme.to_string(),
            source: "dictionary".to_string(),
            note: None,
            status,
            deleted: false,
            deleted_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// In-memory store, cache and user directory behind a repository.
    ///
    /// The concrete handles stay reachable so tests can count store reads,
    /// inspect cache calls, or switch either backend off.
    #[derive(Clone)]
    pub struct StoreHarness {
        pub repo: InstructionRepository,
        pub store: Arc<InMemoryInstructionStore>,
        pub cache: Arc<InMemoryCacheStore>,
        pub users: Arc<InMemoryUserDirectory>,
    }

    impl StoreHarness {
        pub fn new() -> Self {
            Self::with_ttl(Duration::from_secs(300))
        }

        pub fn with_ttl(list_ttl: Duration) -> Self {
            let store = Arc::new(InMemoryInstructionStore::new());
            let cache = Arc::new(InMemoryCacheStore::new());
            let users = Arc::new(InMemoryUserDirectory::new());
            let repo =
                InstructionRepository::new(store.clone(), cache.clone(), users.clone(), list_ttl);
            Self {
                repo,
                store,
                cache,
                users,
            }
        }

        /// Register a user in the directory.
        pub fn add_user(&self, username: &str, role: Role) -> AlpacaResult<UserAccount> {
            let user = account(username, role);
            self.users.upsert(user.clone())?;
            Ok(user)
        }

        /// Write a record straight to the store, bypassing the repository
        /// and its cache invalidation.
        pub async fn seed(&self, record: &InstructionRecord) -> AlpacaResult<()> {
            self.store.insert(record).await
        }
    }

    impl Default for StoreHarness {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Alpaca error variants.

    use super::*;

    /// Assert that a result is a NotFound storage error for `entity_type`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &AlpacaResult<T>, entity_type: EntityType) {
        match result {
            Err(AlpacaError::Storage(StorageError::NotFound { entity_type: et, .. })) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    /// Assert that a result is a StateConflict that found `actual`.
    #[track_caller]
    pub fn assert_state_conflict<T: std::fmt::Debug>(result: &AlpacaResult<T>, actual: StatusCode) {
        match result {
            Err(AlpacaError::Storage(StorageError::StateConflict { actual: a, .. })) => {
                assert_eq!(*a, actual, "Wrong actual status in StateConflict");
            }
            other => panic!("Expected StateConflict({}), got: {:?}", actual, other),
        }
    }

    /// Assert the status decomposition of an aggregate sums to `total`.
    #[track_caller]
    pub fn assert_status_sum(counts: &std::collections::BTreeMap<String, u64>, total: u64) {
        let sum: u64 = StatusCode::ALL
            .iter()
            .map(|code| counts.get(code.as_db_str()).copied().unwrap_or(0))
            .sum();
        assert_eq!(sum, total, "Status counts {:?} do not sum to {}", counts, total);
    }
}
