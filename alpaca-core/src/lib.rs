//! Alpaca Core - Entity Types
//!
//! Pure data structures shared by the storage and service layers.
//! This crate contains no I/O and no business workflow.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod filter;
pub mod identity;

pub use config::AlpacaConfig;
pub use entities::{InstructionRecord, RecordStatus, UserAccount};
pub use enums::{
    EntityType, GroupField, Role, RoleParseError, SortOrder, StatusCode, StatusCodeParseError,
};
pub use error::{
    AlpacaError, AlpacaResult, CacheError, ConfigError, StorageError, ValidationError,
};
pub use filter::{ListQuery, NewRecord, RecordFilter, RecordUpdate, TimeRange, UserQuery};
pub use identity::{new_entity_id, EntityId, RecordId, Timestamp, UserId};
