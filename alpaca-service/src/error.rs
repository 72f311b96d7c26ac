//! Error Types for the Alpaca services
//!
//! The repository returns raw [`AlpacaError`]s. Services classify them into a
//! [`ServiceError`] before anything reaches a caller:
//! - `NotFound` for absent or soft-deleted records
//! - `PermissionDeny` for role and state guard failures
//! - `NotAuthorized` when there is no authenticated caller
//! - `OperationFailed` for backend failures, cancellation and timeouts
//! - `ValidationFailed` for rejected input
//! - `StateConflict` for review attempts on a terminal record

use alpaca_core::{AlpacaError, CacheError, ConfigError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error kinds surfaced by the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Record or user does not exist, or is not visible
    NotFound,

    /// Caller is authenticated but the role or record state forbids the action
    PermissionDeny,

    /// No authenticated caller
    NotAuthorized,

    /// Backend failure, cancellation or deadline expiry
    OperationFailed,

    /// Input rejected before touching the store
    ValidationFailed,

    /// Review attempted on a record that is no longer pending
    StateConflict,
}

impl ErrorCode {
    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::PermissionDeny => "Permission denied",
            ErrorCode::NotAuthorized => "Authentication required",
            ErrorCode::OperationFailed => "Operation failed",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::StateConflict => "Operation conflicts with current state",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// SERVICE ERROR STRUCT
// ============================================================================

/// Classified error returned by every service operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create an error with the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn permission_deny(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDeny, message)
    }

    pub fn not_authorized() -> Self {
        Self::from_code(ErrorCode::NotAuthorized)
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OperationFailed, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::ValidationFailed,
            format!("Required field '{}' is missing", field),
        )
        .with_details(serde_json::json!({ "field": field }))
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn cancelled(operation: &str) -> Self {
        Self::new(
            ErrorCode::OperationFailed,
            format!("Operation '{}' was cancelled", operation),
        )
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::OperationFailed,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {}

// ============================================================================
// CLASSIFICATION
// ============================================================================

impl From<AlpacaError> for ServiceError {
    fn from(err: AlpacaError) -> Self {
        match err {
            AlpacaError::Storage(StorageError::NotFound { entity_type, id }) => {
                ServiceError::not_found(&format!("{:?}", entity_type), id)
            }
            AlpacaError::Storage(StorageError::StateConflict {
                id,
                expected,
                actual,
            }) => ServiceError::state_conflict(format!(
                "Record {} is {}, expected {}",
                id, actual, expected
            )),
            AlpacaError::Validation(e) => ServiceError::from(e),
            AlpacaError::Config(ConfigError::InvalidValue { field, reason, .. }) => {
                ServiceError::validation_failed(format!("Invalid {}: {}", field, reason))
            }
            AlpacaError::Config(ConfigError::MissingRequired { field }) => {
                ServiceError::missing_field(&field)
            }
            AlpacaError::Storage(e) => {
                tracing::error!(error = %e, "Storage error");
                ServiceError::operation_failed("Storage operation failed")
            }
            AlpacaError::Cache(e) => {
                tracing::error!(error = %e, "Cache error");
                match e {
                    CacheError::KeyNotFound { key } => {
                        ServiceError::not_found("CacheEntry", key)
                    }
                    _ => ServiceError::operation_failed("Cache operation failed"),
                }
            }
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::RequiredFieldMissing { field } => ServiceError::missing_field(&field),
            other => ServiceError::validation_failed(other.to_string()),
        }
    }
}

/// Convert from tokio_postgres::Error to ServiceError.
impl From<tokio_postgres::Error> for ServiceError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Log the full error; return a generic one.
        tracing::error!("Database error: {:?}", err);
        ServiceError::operation_failed("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ServiceError.
impl From<deadpool_postgres::PoolError> for ServiceError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);
        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                ServiceError::operation_failed("Database connection pool exhausted")
            }
            deadpool_postgres::PoolError::Closed => {
                ServiceError::operation_failed("Database connection pool is closed")
            }
            _ => ServiceError::operation_failed("Failed to acquire database connection"),
        }
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alpaca_core::{EntityType, StatusCode};
    use uuid::Uuid;

    #[test]
    fn test_not_found_classification() {
        let err: ServiceError = AlpacaError::from(StorageError::NotFound {
            entity_type: EntityType::InstructionRecord,
            id: Uuid::nil(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(err.message.contains("InstructionRecord"));
    }

    #[test]
    fn test_state_conflict_classification() {
        let err: ServiceError = AlpacaError::from(StorageError::StateConflict {
            id: Uuid::nil(),
            expected: StatusCode::Pending,
            actual: StatusCode::Rejected,
        })
        .into();
        assert_eq!(err.code, ErrorCode::StateConflict);
        assert!(err.message.contains("REJECTED"));
    }

    #[test]
    fn test_backend_errors_become_operation_failed() {
        for raw in [
            StorageError::QueryFailed {
                reason: "syntax".to_string(),
            },
            StorageError::Unavailable {
                reason: "down".to_string(),
            },
            StorageError::LockPoisoned,
        ] {
            let err: ServiceError = AlpacaError::from(raw).into();
            assert_eq!(err.code, ErrorCode::OperationFailed);
            // Raw backend detail is not leaked.
            assert_eq!(err.message, "Storage operation failed");
        }
    }

    #[test]
    fn test_missing_field_carries_details() {
        let err: ServiceError = ValidationError::RequiredFieldMissing {
            field: "instruction".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(
            err.details,
            Some(serde_json::json!({ "field": "instruction" }))
        );
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ServiceError::permission_deny("record is not pending");
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("PERMISSION_DENY"));

        let deserialized: ServiceError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let err = ServiceError::timeout("approve");
        let display = format!("{}", err);
        assert!(display.contains("OperationFailed"));
        assert!(display.contains("approve"));
    }
}
