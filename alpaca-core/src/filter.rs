//! Record filters, list queries and partial updates
//!
//! A [`ListQuery`] is the full description of one list read. Its
//! [`ListQuery::fingerprint`] is the cache identity of that read, so every
//! field that changes the result must take part in it.

use crate::{
    InstructionRecord, RecordStatus, Role, SortOrder, StatusCode, Timestamp, UserAccount, UserId,
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Half-open time interval `[from, to)`. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TimeRange {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl TimeRange {
    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        Self { from, to }
    }

    pub fn between(from: Timestamp, to: Timestamp) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from.is_none_or(|from| ts >= from) && self.to.is_none_or(|to| ts < to)
    }
}

/// Optional predicates over instruction records.
///
/// Visibility (`deleted = false`) is never part of the filter; every store
/// applies it implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RecordFilter {
    pub owner_id: Option<UserId>,
    pub theme: Option<String>,
    pub status_code: Option<StatusCode>,
    pub created: Option<TimeRange>,
    pub updated: Option<TimeRange>,
    /// Free-text terms matched as words against instruction, input and output.
    ///
    /// Text is lowercased and split on every non-alphanumeric character; a
    /// record matches when each query term equals one of its words. The
    /// PostgreSQL store evaluates this with the `simple` text search
    /// configuration, which agrees for plain words but keeps some compound
    /// tokens (hyphenated words, URLs, decimals) whole.
    pub query: Option<String>,
}

impl RecordFilter {
    pub fn owned_by(owner_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    pub fn with_owner(mut self, owner_id: UserId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn with_status(mut self, status_code: StatusCode) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_created(mut self, range: TimeRange) -> Self {
        self.created = Some(range);
        self
    }

    pub fn with_updated(mut self, range: TimeRange) -> Self {
        self.updated = Some(range);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Evaluate every present predicate against a record.
    pub fn matches(&self, record: &InstructionRecord) -> bool {
        if let Some(owner_id) = self.owner_id {
            if record.owner_id != owner_id {
                return false;
            }
        }
        if let Some(theme) = &self.theme {
            if &record.theme != theme {
                return false;
            }
        }
        if let Some(code) = self.status_code {
            if record.status.code != code {
                return false;
            }
        }
        if let Some(range) = &self.created {
            if !range.contains(record.created_at) {
                return false;
            }
        }
        if let Some(range) = &self.updated {
            if !range.contains(record.updated_at) {
                return false;
            }
        }
        if let Some(query) = &self.query {
            let words: Vec<String> = [&record.instruction, &record.input, &record.output]
                .into_iter()
                .flat_map(|text| tokenize(text))
                .collect();
            if !tokenize(query).all(|term| words.contains(&term)) {
                return false;
            }
        }
        true
    }

    fn write_canonical(&self, out: &mut String) {
        push_field(out, "owner", self.owner_id.map(|id| id.to_string()));
        push_field(out, "theme", self.theme.clone());
        push_field(
            out,
            "status",
            self.status_code.map(|c| c.as_db_str().to_string()),
        );
        push_range(out, "created", self.created.as_ref());
        push_range(out, "updated", self.updated.as_ref());
        push_field(out, "query", self.query.clone());
    }
}

/// Lowercased words split on anything that is not alphanumeric.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

// Values are length-prefixed so that no choice of theme or query text can make
// two different queries encode to the same string.
fn push_field(out: &mut String, name: &str, value: Option<String>) {
    match value {
        Some(v) => out.push_str(&format!("{name}={}:{v};", v.len())),
        None => out.push_str(&format!("{name}=-;")),
    }
}

fn push_range(out: &mut String, name: &str, range: Option<&TimeRange>) {
    let render = |ts: Option<Timestamp>| {
        ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true))
    };
    match range {
        Some(r) => {
            push_field(out, &format!("{name}.from"), render(r.from));
            push_field(out, &format!("{name}.to"), render(r.to));
        }
        None => push_field(out, name, None),
    }
}

/// One paginated, sorted, filtered list read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ListQuery {
    pub offset: u64,
    /// `None` reads every matching record.
    pub limit: Option<u64>,
    pub sort: SortOrder,
    pub filter: RecordFilter,
}

impl ListQuery {
    pub fn new(filter: RecordFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Deterministic cache fingerprint (hex SHA-256 of the canonical form).
    pub fn fingerprint(&self) -> String {
        let mut canonical = String::new();
        push_field(&mut canonical, "offset", Some(self.offset.to_string()));
        push_field(&mut canonical, "limit", self.limit.map(|l| l.to_string()));
        push_field(&mut canonical, "sort", Some(self.sort.as_sql().to_string()));
        self.filter.write_canonical(&mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Fields of a record at insert time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub owner_id: UserId,
    pub username: String,
    pub instruction: String,
    pub input: String,
    pub output: String,
    pub theme: String,
    pub source: String,
    pub note: Option<String>,
    pub status: RecordStatus,
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecordUpdate {
    pub owner_id: Option<UserId>,
    /// Filled in from the user directory whenever `owner_id` is set.
    pub username: Option<String>,
    pub instruction: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub theme: Option<String>,
    pub source: Option<String>,
    /// `Some(None)` clears the note.
    pub note: Option<Option<String>>,
    pub status: Option<RecordStatus>,
    /// Apply the write only if the stored status still has this code.
    pub expected_status: Option<StatusCode>,
}

impl RecordUpdate {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn expecting(mut self, code: StatusCode) -> Self {
        self.expected_status = Some(code);
        self
    }

    /// True when the update would change nothing but `updated_at`.
    pub fn is_empty(&self) -> bool {
        self.owner_id.is_none()
            && self.instruction.is_none()
            && self.input.is_none()
            && self.output.is_none()
            && self.theme.is_none()
            && self.source.is_none()
            && self.note.is_none()
            && self.status.is_none()
    }

    /// Whether the precondition allows writing over `record`.
    pub fn precondition_holds(&self, record: &InstructionRecord) -> bool {
        self.expected_status
            .is_none_or(|expected| record.status.code == expected)
    }

    /// Apply all present fields and refresh `updated_at`.
    pub fn apply(&self, record: &mut InstructionRecord, now: Timestamp) {
        if let Some(owner_id) = self.owner_id {
            record.owner_id = owner_id;
        }
        if let Some(username) = &self.username {
            record.username = username.clone();
        }
        if let Some(v) = &self.instruction {
            record.instruction = v.clone();
        }
        if let Some(v) = &self.input {
            record.input = v.clone();
        }
        if let Some(v) = &self.output {
            record.output = v.clone();
        }
        if let Some(v) = &self.theme {
            record.theme = v.clone();
        }
        if let Some(v) = &self.source {
            record.source = v.clone();
        }
        if let Some(v) = &self.note {
            record.note = v.clone();
        }
        if let Some(status) = &self.status {
            record.status = status.clone();
        }
        record.updated_at = now;
    }
}

/// Filter and page over user accounts. Pages are ordered by creation time,
/// then id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuery {
    /// Case-insensitive substring of the username.
    pub username_contains: Option<String>,
    pub role: Option<Role>,
    pub offset: u64,
    pub limit: u64,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            username_contains: None,
            role: None,
            offset: 0,
            limit: 50,
        }
    }
}

impl UserQuery {
    pub fn matches(&self, user: &UserAccount) -> bool {
        if let Some(needle) = &self.username_contains {
            if !user
                .username
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        self.role.is_none_or(|role| user.role == role)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;
    use chrono::{Duration, TimeZone, Utc};

    fn record() -> InstructionRecord {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        InstructionRecord {
            record_id: new_entity_id(),
            owner_id: new_entity_id(),
            username: "alice".to_string(),
            instruction: "Add 1+1".to_string(),
            input: String::new(),
            output: "The answer is 2".to_string(),
            theme: "math".to_string(),
            source: "book".to_string(),
            note: None,
            status: RecordStatus::pending(),
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_time_range_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(1);
        let range = TimeRange::between(start, end);
        assert!(range.contains(start));
        assert!(range.contains(end - Duration::nanoseconds(1)));
        assert!(!range.contains(end));
        assert!(TimeRange::default().contains(end));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(RecordFilter::default().matches(&record()));
    }

    #[test]
    fn test_filter_predicates_are_conjunctive() {
        let r = record();
        assert!(RecordFilter::default()
            .with_theme("math")
            .with_status(StatusCode::Pending)
            .matches(&r));
        assert!(!RecordFilter::default()
            .with_theme("math")
            .with_status(StatusCode::Approved)
            .matches(&r));
        assert!(!RecordFilter::owned_by(new_entity_id()).matches(&r));
    }

    #[test]
    fn test_query_matches_whole_words_case_insensitively() {
        let r = record();
        assert!(RecordFilter::default().with_query("ANSWER add").matches(&r));
        assert!(!RecordFilter::default().with_query("answ").matches(&r));
        assert!(!RecordFilter::default().with_query("answer subtract").matches(&r));
    }

    #[test]
    fn test_fingerprint_differs_per_predicate() {
        let base = ListQuery::new(RecordFilter::default()).page(0, 10);
        let themed = ListQuery::new(RecordFilter::default().with_theme("math")).page(0, 10);
        let paged = ListQuery::new(RecordFilter::default()).page(10, 10);
        let asc = base.clone().sorted(SortOrder::Asc);
        let unbounded = ListQuery::new(RecordFilter::default());
        let all = [&base, &themed, &paged, &asc, &unbounded];
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a.fingerprint(), b.fingerprint());
            }
        }
    }

    #[test]
    fn test_fingerprint_length_prefix_prevents_collisions() {
        let a = ListQuery::new(RecordFilter::default().with_theme("a;query=1:b"));
        let b = ListQuery::new(RecordFilter::default().with_theme("a").with_query("b"));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_update_precondition() {
        let r = record();
        let update = RecordUpdate::status(RecordStatus::approved());
        assert!(update.precondition_holds(&r));
        assert!(update.clone().expecting(StatusCode::Pending).precondition_holds(&r));
        assert!(!update.expecting(StatusCode::Rejected).precondition_holds(&r));
    }

    #[test]
    fn test_update_apply_only_touches_present_fields() {
        let mut r = record();
        let later = r.updated_at + Duration::minutes(5);
        let update = RecordUpdate {
            output: Some("2".to_string()),
            note: Some(Some("checked".to_string())),
            ..RecordUpdate::default()
        };
        update.apply(&mut r, later);
        assert_eq!(r.output, "2");
        assert_eq!(r.note.as_deref(), Some("checked"));
        assert_eq!(r.instruction, "Add 1+1");
        assert_eq!(r.status, RecordStatus::pending());
        assert_eq!(r.updated_at, later);
    }

    #[test]
    fn test_update_clears_note() {
        let mut r = record();
        r.note = Some("checked".to_string());
        let keep = RecordUpdate::status(RecordStatus::approved());
        let now = r.updated_at;
        keep.apply(&mut r, now);
        assert_eq!(r.note.as_deref(), Some("checked"));

        let clear = RecordUpdate {
            note: Some(None),
            ..RecordUpdate::default()
        };
        assert!(!clear.is_empty());
        let now = r.updated_at;
        clear.apply(&mut r, now);
        assert_eq!(r.note, None);
    }

    #[test]
    fn test_update_is_empty() {
        assert!(RecordUpdate::default().is_empty());
        assert!(RecordUpdate::default()
            .expecting(StatusCode::Pending)
            .is_empty());
        assert!(!RecordUpdate::status(RecordStatus::approved()).is_empty());
    }

    #[test]
    fn test_user_query_matches() {
        let user = UserAccount {
            user_id: new_entity_id(),
            username: "Alice".to_string(),
            role: Role::User,
            created_at: Utc::now(),
        };
        let q = UserQuery {
            username_contains: Some("lic".to_string()),
            ..UserQuery::default()
        };
        assert!(q.matches(&user));
        let admins = UserQuery {
            role: Some(Role::Admin),
            ..UserQuery::default()
        };
        assert!(!admins.matches(&user));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_filter() -> impl Strategy<Value = RecordFilter> {
        (
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of(prop_oneof![
                Just(StatusCode::Pending),
                Just(StatusCode::Approved),
                Just(StatusCode::Rejected),
            ]),
            proptest::option::of("[a-z ]{1,16}"),
        )
            .prop_map(|(theme, status_code, query)| RecordFilter {
                theme,
                status_code,
                query,
                ..RecordFilter::default()
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Fingerprinting is a pure function of the query.
        #[test]
        fn prop_fingerprint_deterministic(
            filter in arb_filter(),
            offset in 0u64..1000,
            limit in proptest::option::of(1u64..100),
        ) {
            let query = ListQuery { offset, limit, sort: SortOrder::Desc, filter };
            prop_assert_eq!(query.fingerprint(), query.clone().fingerprint());
            prop_assert_eq!(query.fingerprint().len(), 64);
        }

        /// Distinct queries get distinct fingerprints.
        #[test]
        fn prop_fingerprint_injective(a in arb_filter(), b in arb_filter()) {
            let qa = ListQuery::new(a.clone());
            let qb = ListQuery::new(b.clone());
            prop_assert_eq!(a == b, qa.fingerprint() == qb.fingerprint());
        }
    }
}
