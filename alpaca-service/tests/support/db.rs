//! PostgreSQL stack for `db-tests` runs, configured from `ALPACA_DB_*`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use alpaca_core::{new_entity_id, Role, UserAccount};
use alpaca_service::{db::ensure_schema, DbConfig, PgInstructionStore, PgUserDirectory, ServiceResult};
use alpaca_storage::{InMemoryCacheStore, InstructionRepository};
use chrono::Utc;
use deadpool_postgres::Pool;

pub async fn test_pool() -> ServiceResult<Pool> {
    let pool = DbConfig::from_env().create_pool()?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

pub struct PgHarness {
    pub pool: Pool,
    pub store: Arc<PgInstructionStore>,
    pub cache: Arc<InMemoryCacheStore>,
    pub repo: InstructionRepository,
}

/// Whether `DB_TESTS=1` is set.
pub fn enabled() -> bool {
    std::env::var("DB_TESTS").map(|v| v == "1").unwrap_or(false)
}

impl PgHarness {
    /// `None` unless `DB_TESTS=1`.
    pub async fn connect() -> ServiceResult<Option<Self>> {
        if !enabled() {
            return Ok(None);
        }
        let pool = test_pool().await?;
        let store = Arc::new(PgInstructionStore::new(pool.clone()));
        let cache = Arc::new(InMemoryCacheStore::new());
        let users = Arc::new(PgUserDirectory::new(pool.clone()));
        let repo = InstructionRepository::new(
            store.clone(),
            cache.clone(),
            users,
            Duration::from_secs(300),
        );
        Ok(Some(Self {
            pool,
            store,
            cache,
            repo,
        }))
    }

    /// Insert a user row with a unique name so runs never collide.
    pub async fn add_user(&self, prefix: &str, role: Role) -> ServiceResult<UserAccount> {
        let user = UserAccount {
            user_id: new_entity_id(),
            username: format!("{}-{}", prefix, new_entity_id().simple()),
            role,
            created_at: Utc::now(),
        };
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO users (user_id, username, role, created_at) VALUES ($1, $2, $3, $4)",
            &[&user.user_id, &user.username, &role.as_db_str(), &user.created_at],
        )
        .await?;
        Ok(user)
    }
}
