//! Error types for Alpaca operations

use crate::{EntityType, StatusCode};
use thiserror::Error;
use uuid::Uuid;

/// Document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("State conflict on {id}: expected {expected}, found {actual}")]
    StateConflict {
        id: Uuid,
        expected: StatusCode,
        actual: StatusCode,
    },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Delete failed for {entity_type:?}: {reason}")]
    DeleteFailed { entity_type: EntityType, reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache deserialization failed: {reason}")]
    Deserialization { reason: String },

    #[error("Cache transaction failed: {reason}")]
    Transaction { reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Alpaca errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AlpacaError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl AlpacaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AlpacaError::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for Alpaca operations.
pub type AlpacaResult<T> = Result<T, AlpacaError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::InstructionRecord,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("InstructionRecord"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_storage_error_display_state_conflict() {
        let err = StorageError::StateConflict {
            id: Uuid::nil(),
            expected: StatusCode::Pending,
            actual: StatusCode::Approved,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected PENDING"));
        assert!(msg.contains("found APPROVED"));
    }

    #[test]
    fn test_cache_error_display_key_not_found() {
        let err = CacheError::KeyNotFound {
            key: "alpaca_data:abc".to_string(),
        };
        assert_eq!(err.to_string(), "Cache key not found: alpaca_data:abc");
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "list_cache_ttl".to_string(),
            value: "0s".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("list_cache_ttl"));
        assert!(msg.contains("0s"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_master_error_from_conversions() {
        let err: AlpacaError = StorageError::LockPoisoned.into();
        assert!(matches!(err, AlpacaError::Storage(StorageError::LockPoisoned)));

        let err: AlpacaError = CacheError::Unavailable {
            reason: "down".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("Cache error"));
    }

    #[test]
    fn test_is_not_found() {
        let err: AlpacaError = StorageError::NotFound {
            entity_type: EntityType::User,
            id: Uuid::nil(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(!AlpacaError::from(StorageError::LockPoisoned).is_not_found());
    }
}
