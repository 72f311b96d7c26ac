//! Entity structs

use crate::{RecordId, Role, StatusCode, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Review status: code plus the reviewer's message (set on rejection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecordStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RecordStatus {
    pub fn pending() -> Self {
        Self {
            code: StatusCode::Pending,
            message: String::new(),
        }
    }

    pub fn approved() -> Self {
        Self {
            code: StatusCode::Approved,
            message: String::new(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Rejected,
            message: message.into(),
        }
    }
}

/// An instruction/input/output triple submitted for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub record_id: RecordId,
    pub owner_id: UserId,
    /// Username of the owner at submission or last reassignment.
    pub username: String,
    pub instruction: String,
    pub input: String,
    pub output: String,
    pub theme: String,
    pub source: String,
    pub note: Option<String>,
    pub status: RecordStatus,
    pub deleted: bool,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl InstructionRecord {
    /// Visible to every read path.
    pub fn is_visible(&self) -> bool {
        !self.deleted
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}

/// A user account as seen by this service. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub created_at: Timestamp,
}
