//! Enum types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity type discriminator, used for error reporting and cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    InstructionRecord,
    User,
}

impl EntityType {
    /// Namespace prefix for cache keys of this entity type.
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            EntityType::InstructionRecord => "alpaca_data",
            EntityType::User => "alpaca_user",
        }
    }
}

// ============================================================================
// REVIEW STATUS
// ============================================================================

/// Review state of an instruction record.
///
/// `Pending` is the only initial state. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl StatusCode {
    /// All status codes in their canonical order.
    pub const ALL: [StatusCode; 3] = [
        StatusCode::Pending,
        StatusCode::Approved,
        StatusCode::Rejected,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            StatusCode::Pending => "PENDING",
            StatusCode::Approved => "APPROVED",
            StatusCode::Rejected => "REJECTED",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StatusCodeParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(StatusCode::Pending),
            "approved" => Ok(StatusCode::Approved),
            "rejected" => Ok(StatusCode::Rejected),
            _ => Err(StatusCodeParseError(s.to_string())),
        }
    }

    /// Whether the review outcome is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusCode::Pending)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for StatusCode {
    type Err = StatusCodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid status code string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodeParseError(pub String);

impl fmt::Display for StatusCodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid status code: {}", self.0)
    }
}

impl std::error::Error for StatusCodeParseError {}

// ============================================================================
// ROLES
// ============================================================================

/// Role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, RoleParseError> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(RoleParseError(s.to_string())),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid role string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleParseError(pub String);

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid role: {}", self.0)
    }
}

impl std::error::Error for RoleParseError {}

// ============================================================================
// QUERY SHAPING
// ============================================================================

/// Field an aggregate count can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    Theme,
    StatusCode,
    OwnerId,
    Source,
}

impl GroupField {
    /// Column holding this field in the records table.
    pub fn as_db_column(&self) -> &'static str {
        match self {
            GroupField::Theme => "theme",
            GroupField::StatusCode => "status_code",
            GroupField::OwnerId => "owner_id",
            GroupField::Source => "source",
        }
    }
}

/// Sort direction on record creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}
