//! Database Connection Pool Module
//!
//! PostgreSQL document store and user directory over a deadpool-postgres
//! pool. Records live in one table, `instruction_records`; soft-deleted rows
//! stay in it with `deleted = TRUE` until purged.

use std::collections::BTreeMap;
use std::time::Duration;

use alpaca_core::{
    AlpacaError, AlpacaResult, EntityType, GroupField, InstructionRecord, ListQuery,
    RecordFilter, RecordId, RecordStatus, RecordUpdate, Role, StatusCode, StorageError,
    Timestamp, UserAccount, UserId, UserQuery,
};
use alpaca_storage::{InstructionStore, UserDirectory};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{IsolationLevel, NoTls, Row};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a free connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "alpaca".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("ALPACA_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("ALPACA_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("ALPACA_DB_NAME").unwrap_or_else(|_| "alpaca".to_string()),
            user: std::env::var("ALPACA_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("ALPACA_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ALPACA_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("ALPACA_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ServiceResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            ServiceError::operation_failed(format!("Failed to create pool: {}", e))
        })
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id     UUID PRIMARY KEY,
    username    TEXT NOT NULL,
    role        TEXT NOT NULL DEFAULT 'USER',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS instruction_records (
    record_id       UUID PRIMARY KEY,
    owner_id        UUID NOT NULL,
    username        TEXT NOT NULL,
    instruction     TEXT NOT NULL,
    input           TEXT NOT NULL DEFAULT '',
    output          TEXT NOT NULL,
    theme           TEXT NOT NULL,
    source          TEXT NOT NULL,
    note            TEXT,
    status_code     TEXT NOT NULL DEFAULT 'PENDING',
    status_message  TEXT NOT NULL DEFAULT '',
    deleted         BOOLEAN NOT NULL DEFAULT FALSE,
    deleted_at      TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_owner ON instruction_records (owner_id);
CREATE INDEX IF NOT EXISTS idx_records_theme ON instruction_records (theme);
CREATE INDEX IF NOT EXISTS idx_records_status ON instruction_records (status_code);
CREATE INDEX IF NOT EXISTS idx_records_created ON instruction_records (created_at);
CREATE INDEX IF NOT EXISTS idx_records_updated ON instruction_records (updated_at);
CREATE INDEX IF NOT EXISTS idx_records_text ON instruction_records
    USING GIN (to_tsvector('simple', instruction || ' ' || input || ' ' || output));
"#;

/// Create tables and indexes if missing.
pub async fn ensure_schema(pool: &Pool) -> ServiceResult<()> {
    let conn = pool.get().await?;
    conn.batch_execute(SCHEMA).await?;
    tracing::info!("Database schema ensured");
    Ok(())
}

const RECORD_COLUMNS: &str = "record_id, owner_id, username, instruction, input, output, \
     theme, source, note, status_code, status_message, deleted, deleted_at, created_at, updated_at";

// ============================================================================
// QUERY BUILDING
// ============================================================================

/// Owned SQL parameter.
#[derive(Debug, Clone)]
enum SqlParam {
    Uuid(Uuid),
    Text(String),
    OptText(Option<String>),
    Timestamp(Timestamp),
    Long(i64),
}

impl SqlParam {
    fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Uuid(v) => v,
            SqlParam::Text(v) => v,
            SqlParam::OptText(v) => v,
            SqlParam::Timestamp(v) => v,
            SqlParam::Long(v) => v,
        }
    }
}

/// Numbered-placeholder SQL fragments plus their parameters.
#[derive(Debug, Default)]
struct SqlParts {
    clauses: Vec<String>,
    params: Vec<SqlParam>,
}

impl SqlParts {
    /// Append `template` with every `{}` replaced by the next placeholder.
    fn push(&mut self, template: &str, param: SqlParam) {
        self.params.push(param);
        let placeholder = format!("${}", self.params.len());
        self.clauses.push(template.replace("{}", &placeholder));
    }

    fn push_raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    /// Reserve a placeholder without a clause (LIMIT, OFFSET, key columns).
    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn joined(&self, sep: &str) -> String {
        self.clauses.join(sep)
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(SqlParam::as_to_sql).collect()
    }

    /// `deleted = FALSE` plus every present predicate of `filter`.
    fn visible(filter: &RecordFilter) -> Self {
        let mut parts = Self::default();
        parts.push_raw("deleted = FALSE");
        if let Some(owner_id) = filter.owner_id {
            parts.push("owner_id = {}", SqlParam::Uuid(owner_id));
        }
        if let Some(theme) = &filter.theme {
            parts.push("theme = {}", SqlParam::Text(theme.clone()));
        }
        if let Some(code) = filter.status_code {
            parts.push(
                "status_code = {}",
                SqlParam::Text(code.as_db_str().to_string()),
            );
        }
        for (column, range) in [("created_at", &filter.created), ("updated_at", &filter.updated)] {
            if let Some(range) = range {
                if let Some(from) = range.from {
                    parts.push(&format!("{} >= {{}}", column), SqlParam::Timestamp(from));
                }
                if let Some(to) = range.to {
                    parts.push(&format!("{} < {{}}", column), SqlParam::Timestamp(to));
                }
            }
        }
        // `simple` lowercases without stemming, matching RecordFilter::matches
        // for plain words.
        if let Some(query) = &filter.query {
            parts.push(
                "to_tsvector('simple', instruction || ' ' || input || ' ' || output) \
                 @@ plainto_tsquery('simple', {})",
                SqlParam::Text(query.clone()),
            );
        }
        parts
    }
}

/// Read-only REPEATABLE READ transaction, so a COUNT and the page it
/// describes see the same rows.
async fn read_snapshot(
    conn: &mut deadpool_postgres::Object,
) -> AlpacaResult<deadpool_postgres::Transaction<'_>> {
    conn.build_transaction()
        .isolation_level(IsolationLevel::RepeatableRead)
        .read_only(true)
        .start()
        .await
        .map_err(query_failed)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn query_failed(err: tokio_postgres::Error) -> AlpacaError {
    tracing::error!("Database error: {:?}", err);
    StorageError::QueryFailed {
        reason: err.to_string(),
    }
    .into()
}

fn pool_unavailable(err: deadpool_postgres::PoolError) -> AlpacaError {
    tracing::error!("Connection pool error: {:?}", err);
    StorageError::Unavailable {
        reason: err.to_string(),
    }
    .into()
}

fn record_from_row(row: &Row) -> AlpacaResult<InstructionRecord> {
    let code: String = row.get("status_code");
    let code = StatusCode::from_db_str(&code).map_err(|e| StorageError::QueryFailed {
        reason: e.to_string(),
    })?;
    Ok(InstructionRecord {
        record_id: row.get("record_id"),
        owner_id: row.get("owner_id"),
        username: row.get("username"),
        instruction: row.get("instruction"),
        input: row.get("input"),
        output: row.get("output"),
        theme: row.get("theme"),
        source: row.get("source"),
        note: row.get("note"),
        status: RecordStatus {
            code,
            message: row.get("status_message"),
        },
        deleted: row.get("deleted"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn user_from_row(row: &Row) -> AlpacaResult<UserAccount> {
    let role: String = row.get("role");
    Ok(UserAccount {
        user_id: row.get("user_id"),
        username: row.get("username"),
        role: Role::from_db_str(&role).map_err(|e| StorageError::QueryFailed {
            reason: e.to_string(),
        })?,
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// INSTRUCTION STORE
// ============================================================================

/// [`InstructionStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgInstructionStore {
    pool: Pool,
}

impl PgInstructionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> AlpacaResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_unavailable)
    }
}

#[async_trait]
impl InstructionStore for PgInstructionStore {
    async fn find_by_id(&self, id: RecordId) -> AlpacaResult<Option<InstructionRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM instruction_records WHERE record_id = $1 AND deleted = FALSE",
            RECORD_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&id]).await.map_err(query_failed)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find(&self, query: &ListQuery) -> AlpacaResult<(Vec<InstructionRecord>, u64)> {
        let mut conn = self.get_conn().await?;
        // Total and page must come from the same snapshot.
        let tx = read_snapshot(&mut conn).await?;

        let mut parts = SqlParts::visible(&query.filter);
        let where_sql = parts.joined(" AND ");

        let count_sql = format!(
            "SELECT COUNT(*) FROM instruction_records WHERE {}",
            where_sql
        );
        let total: i64 = tx
            .query_one(&count_sql, &parts.params())
            .await
            .map_err(query_failed)?
            .get(0);

        let direction = query.sort.as_sql();
        let mut sql = format!(
            "SELECT {} FROM instruction_records WHERE {} ORDER BY created_at {}, record_id {}",
            RECORD_COLUMNS, where_sql, direction, direction
        );
        let offset = parts.bind(SqlParam::Long(to_i64(query.offset)));
        sql.push_str(&format!(" OFFSET {}", offset));
        if let Some(limit) = query.limit {
            let limit = parts.bind(SqlParam::Long(to_i64(limit)));
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = tx
            .query(&sql, &parts.params())
            .await
            .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;
        let items = rows
            .iter()
            .map(record_from_row)
            .collect::<AlpacaResult<Vec<_>>>()?;
        Ok((items, total.max(0) as u64))
    }

    async fn count(&self, filter: &RecordFilter) -> AlpacaResult<u64> {
        let conn = self.get_conn().await?;
        let parts = SqlParts::visible(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM instruction_records WHERE {}",
            parts.joined(" AND ")
        );
        let count: i64 = conn
            .query_one(&sql, &parts.params())
            .await
            .map_err(query_failed)?
            .get(0);
        Ok(count.max(0) as u64)
    }

    async fn aggregate_count(
        &self,
        group: GroupField,
        filter: &RecordFilter,
    ) -> AlpacaResult<BTreeMap<String, u64>> {
        let conn = self.get_conn().await?;
        let parts = SqlParts::visible(filter);
        let column = group.as_db_column();
        let sql = format!(
            "SELECT {col}::text AS value, COUNT(*) AS n FROM instruction_records \
             WHERE {} GROUP BY {col}",
            parts.joined(" AND "),
            col = column
        );
        let rows = conn
            .query(&sql, &parts.params())
            .await
            .map_err(query_failed)?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let value: String = row.get("value");
            let n: i64 = row.get("n");
            counts.insert(value, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn insert(&self, record: &InstructionRecord) -> AlpacaResult<()> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "INSERT INTO instruction_records ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            RECORD_COLUMNS
        );
        let status_code = record.status.code.as_db_str();
        conn.execute(
            &sql,
            &[
                &record.record_id,
                &record.owner_id,
                &record.username,
                &record.instruction,
                &record.input,
                &record.output,
                &record.theme,
                &record.source,
                &record.note,
                &status_code,
                &record.status.message,
                &record.deleted,
                &record.deleted_at,
                &record.created_at,
                &record.updated_at,
            ],
        )
        .await
        .map_err(|e| {
            tracing::error!("Database error: {:?}", e);
            StorageError::InsertFailed {
                entity_type: EntityType::InstructionRecord,
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }

    async fn update(
        &self,
        id: RecordId,
        update: &RecordUpdate,
        now: Timestamp,
    ) -> AlpacaResult<Option<InstructionRecord>> {
        let conn = self.get_conn().await?;

        let mut set = SqlParts::default();
        set.push("updated_at = {}", SqlParam::Timestamp(now));
        if let Some(owner_id) = update.owner_id {
            set.push("owner_id = {}", SqlParam::Uuid(owner_id));
        }
        let text_fields = [
            ("username", &update.username),
            ("instruction", &update.instruction),
            ("input", &update.input),
            ("output", &update.output),
            ("theme", &update.theme),
            ("source", &update.source),
        ];
        for (column, value) in text_fields {
            if let Some(value) = value {
                set.push(&format!("{} = {{}}", column), SqlParam::Text(value.clone()));
            }
        }
        if let Some(note) = &update.note {
            set.push("note = {}", SqlParam::OptText(note.clone()));
        }
        if let Some(status) = &update.status {
            set.push(
                "status_code = {}",
                SqlParam::Text(status.code.as_db_str().to_string()),
            );
            set.push("status_message = {}", SqlParam::Text(status.message.clone()));
        }

        let set_sql = set.joined(", ");
        let id_param = set.bind(SqlParam::Uuid(id));
        let mut sql = format!(
            "UPDATE instruction_records SET {} WHERE record_id = {} AND deleted = FALSE",
            set_sql, id_param
        );
        if let Some(expected) = update.expected_status {
            let expected = set.bind(SqlParam::Text(expected.as_db_str().to_string()));
            sql.push_str(&format!(" AND status_code = {}", expected));
        }
        sql.push_str(&format!(" RETURNING {}", RECORD_COLUMNS));

        let row = conn
            .query_opt(&sql, &set.params())
            .await
            .map_err(|e| {
                tracing::error!("Database error: {:?}", e);
                StorageError::UpdateFailed {
                    entity_type: EntityType::InstructionRecord,
                    id,
                    reason: e.to_string(),
                }
            })?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn soft_delete(
        &self,
        id: RecordId,
        expected_status: Option<StatusCode>,
        now: Timestamp,
    ) -> AlpacaResult<bool> {
        let conn = self.get_conn().await?;
        let expected = expected_status.map(|code| code.as_db_str());
        let affected = conn
            .execute(
                "UPDATE instruction_records \
                 SET deleted = TRUE, deleted_at = $2, updated_at = $2 \
                 WHERE record_id = $1 AND deleted = FALSE \
                 AND ($3::text IS NULL OR status_code = $3)",
                &[&id, &now, &expected],
            )
            .await
            .map_err(|e| {
                tracing::error!("Database error: {:?}", e);
                StorageError::DeleteFailed {
                    entity_type: EntityType::InstructionRecord,
                    reason: e.to_string(),
                }
            })?;
        Ok(affected > 0)
    }

    async fn hard_delete(&self, id: RecordId) -> AlpacaResult<bool> {
        let conn = self.get_conn().await?;
        let affected = conn
            .execute("DELETE FROM instruction_records WHERE record_id = $1", &[&id])
            .await
            .map_err(query_failed)?;
        Ok(affected > 0)
    }

    async fn hard_delete_matching(&self, filter: &RecordFilter) -> AlpacaResult<u64> {
        let conn = self.get_conn().await?;
        let parts = SqlParts::visible(filter);
        let sql = format!(
            "DELETE FROM instruction_records WHERE {}",
            parts.joined(" AND ")
        );
        conn.execute(&sql, &parts.params())
            .await
            .map_err(query_failed)
    }

    async fn purge_deleted_before(&self, cutoff: Timestamp) -> AlpacaResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "DELETE FROM instruction_records WHERE deleted = TRUE AND deleted_at < $1",
            &[&cutoff],
        )
        .await
        .map_err(query_failed)
    }
}

// ============================================================================
// USER DIRECTORY
// ============================================================================

/// [`UserDirectory`] over the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: Pool,
}

impl PgUserDirectory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> AlpacaResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_unavailable)
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get(&self, id: UserId) -> AlpacaResult<Option<UserAccount>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id, username, role, created_at FROM users WHERE user_id = $1",
                &[&id],
            )
            .await
            .map_err(query_failed)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list(&self, query: &UserQuery) -> AlpacaResult<(Vec<UserAccount>, u64)> {
        let mut conn = self.get_conn().await?;
        let tx = read_snapshot(&mut conn).await?;

        let mut parts = SqlParts::default();
        parts.push_raw("TRUE");
        if let Some(needle) = &query.username_contains {
            parts.push(
                "strpos(lower(username), lower({})) > 0",
                SqlParam::Text(needle.clone()),
            );
        }
        if let Some(role) = query.role {
            parts.push("role = {}", SqlParam::Text(role.as_db_str().to_string()));
        }
        let where_sql = parts.joined(" AND ");

        let total: i64 = tx
            .query_one(
                &format!("SELECT COUNT(*) FROM users WHERE {}", where_sql),
                &parts.params(),
            )
            .await
            .map_err(query_failed)?
            .get(0);

        let offset = parts.bind(SqlParam::Long(to_i64(query.offset)));
        let limit = parts.bind(SqlParam::Long(to_i64(query.limit)));
        let sql = format!(
            "SELECT user_id, username, role, created_at FROM users WHERE {} \
             ORDER BY created_at, user_id OFFSET {} LIMIT {}",
            where_sql, offset, limit
        );
        let rows = tx
            .query(&sql, &parts.params())
            .await
            .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;
        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<AlpacaResult<Vec<_>>>()?;
        Ok((users, total.max(0) as u64))
    }
}
