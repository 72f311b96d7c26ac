//! Request and response types of the services.
//!
//! Timestamps leave the service as RFC 3339 strings; everything else keeps
//! the core types.

use std::collections::BTreeMap;

use alpaca_core::{
    InstructionRecord, ListQuery, RecordFilter, RecordId, RecordStatus, Role, SortOrder,
    StatusCode, TimeRange, UserId,
};
use chrono::{NaiveDate, SecondsFormat};
use serde::{Deserialize, Serialize};

// ============================================================================
// RECORD REQUESTS
// ============================================================================

/// Submission of a new record by its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRecordRequest {
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    pub output: String,
    /// Blank or absent falls back to the configured default theme.
    pub theme: Option<String>,
    pub source: String,
    pub note: Option<String>,
}

/// Owner edit of a pending record. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecordRequest {
    pub instruction: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub theme: Option<String>,
    pub source: Option<String>,
    pub note: Option<String>,
    /// Remove the note. Cannot be combined with `note`.
    #[serde(default)]
    pub clear_note: bool,
}

impl UpdateRecordRequest {
    pub fn is_empty(&self) -> bool {
        self.instruction.is_none()
            && self.input.is_none()
            && self.output.is_none()
            && self.theme.is_none()
            && self.source.is_none()
            && self.note.is_none()
            && !self.clear_note
    }
}

/// Administrator correction of a record in any state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUpdateRecordRequest {
    /// Reassign the record; the username snapshot follows the new owner.
    pub owner_id: Option<UserId>,
    #[serde(flatten)]
    pub fields: UpdateRecordRequest,
}

impl AdminUpdateRecordRequest {
    pub fn is_empty(&self) -> bool {
        self.owner_id.is_none() && self.fields.is_empty()
    }
}

/// Filter and page of a record list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRecordsRequest {
    /// Only honoured for administrators; owners always see their own records.
    pub owner_id: Option<UserId>,
    pub theme: Option<String>,
    pub status_code: Option<StatusCode>,
    pub created: Option<TimeRange>,
    pub updated: Option<TimeRange>,
    pub query: Option<String>,
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
    #[serde(default)]
    pub sort: SortOrder,
}

impl ListRecordsRequest {
    pub fn filter(&self) -> RecordFilter {
        RecordFilter {
            owner_id: self.owner_id,
            theme: self.theme.clone(),
            status_code: self.status_code,
            created: self.created,
            updated: self.updated,
            // Blank queries match everything.
            query: self
                .query
                .as_ref()
                .filter(|q| !q.trim().is_empty())
                .cloned(),
        }
    }

    pub fn to_query(&self) -> ListQuery {
        ListQuery {
            offset: self.offset,
            limit: self.limit,
            sort: self.sort,
            filter: self.filter(),
        }
    }
}

// ============================================================================
// RECORD RESPONSES
// ============================================================================

/// Outward shape of an instruction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResponse {
    pub record_id: RecordId,
    pub owner_id: UserId,
    pub username: String,
    pub instruction: String,
    pub input: String,
    pub output: String,
    pub theme: String,
    pub source: String,
    pub note: Option<String>,
    pub status: RecordStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl From<InstructionRecord> for RecordResponse {
    fn from(r: InstructionRecord) -> Self {
        Self {
            record_id: r.record_id,
            owner_id: r.owner_id,
            username: r.username,
            instruction: r.instruction,
            input: r.input,
            output: r.output,
            theme: r.theme,
            source: r.source,
            note: r.note,
            status: r.status,
            created_at: r.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            updated_at: r.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRecordsResponse {
    pub items: Vec<RecordResponse>,
    /// Matching records ignoring pagination.
    pub total: u64,
}

/// The instruction/input/output projection used for dataset export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionTriple {
    pub instruction: String,
    pub input: String,
    pub output: String,
}

impl From<InstructionRecord> for InstructionTriple {
    fn from(r: InstructionRecord) -> Self {
        Self {
            instruction: r.instruction,
            input: r.input,
            output: r.output,
        }
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Four-way status decomposition. `total` is always the sum of the other three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBreakdown {
    pub total: u64,
    pub pending_count: u64,
    pub approved_count: u64,
    pub rejected_count: u64,
}

impl StatusBreakdown {
    /// Build from a status-grouped aggregate keyed by the persisted status string.
    pub fn from_aggregate(counts: &BTreeMap<String, u64>) -> Self {
        let get = |code: StatusCode| counts.get(code.as_db_str()).copied().unwrap_or(0);
        let pending_count = get(StatusCode::Pending);
        let approved_count = get(StatusCode::Approved);
        let rejected_count = get(StatusCode::Rejected);
        Self {
            total: pending_count + approved_count + rejected_count,
            pending_count,
            approved_count,
            rejected_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatistic {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counts: StatusBreakdown,
    pub theme_count: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatistic {
    /// All-time counts.
    #[serde(flatten)]
    pub counts: StatusBreakdown,
    pub theme_count: BTreeMap<String, u64>,
    /// One entry per day of the window, oldest first.
    pub daily: Vec<DailyStatistic>,
}

/// Inclusive date window of the daily rollup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsWindow {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl StatisticsWindow {
    pub fn between(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date: Some(start_date),
            end_date: Some(end_date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatistic {
    pub user_id: UserId,
    pub username: String,
    #[serde(flatten)]
    pub counts: StatusBreakdown,
}

/// Filter and page of the user statistic list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatisticListRequest {
    pub username_contains: Option<String>,
    pub role: Option<Role>,
    #[serde(default)]
    pub offset: u64,
    /// Defaults to 50.
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatisticList {
    pub items: Vec<UserStatistic>,
    /// Matching users ignoring pagination.
    pub total: u64,
}
