//! Composition root.
//!
//! Every long-lived handle (pool, cache, repository, services, jobs) is built
//! here and closed by [`AppState::shutdown`]. Nothing is global.

use std::sync::Arc;

use alpaca_core::AlpacaError;
use alpaca_storage::{
    CacheStore, InMemoryCacheStore, InMemoryInstructionStore, InMemoryUserDirectory,
    InstructionRepository, InstructionStore, LmdbCacheStore, UserDirectory,
};
use deadpool_postgres::Pool;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{CacheBackendKind, ServiceConfig};
use crate::db::{ensure_schema, PgInstructionStore, PgUserDirectory};
use crate::error::{ServiceError, ServiceResult};
use crate::jobs::{purge_task, PurgeConfig, PurgeMetrics};
use crate::services::{ReviewService, StatisticsService};

enum CacheHandle {
    Lmdb(Arc<LmdbCacheStore>),
    Memory(Arc<InMemoryCacheStore>),
}

impl CacheHandle {
    fn open(kind: &CacheBackendKind) -> ServiceResult<Self> {
        match kind {
            CacheBackendKind::Lmdb { path, max_size_mb } => {
                let store = LmdbCacheStore::open(path, *max_size_mb)
                    .map_err(|e| ServiceError::from(AlpacaError::from(e)))?;
                tracing::info!(path = %path.display(), max_size_mb, "LMDB cache opened");
                Ok(CacheHandle::Lmdb(Arc::new(store)))
            }
            CacheBackendKind::Memory => Ok(CacheHandle::Memory(Arc::new(InMemoryCacheStore::new()))),
        }
    }

    fn as_store(&self) -> Arc<dyn CacheStore> {
        match self {
            CacheHandle::Lmdb(store) => Arc::clone(store) as Arc<dyn CacheStore>,
            CacheHandle::Memory(store) => Arc::clone(store) as Arc<dyn CacheStore>,
        }
    }
}

/// Everything a front end needs to serve requests.
pub struct AppState {
    pub config: ServiceConfig,
    pub repository: InstructionRepository,
    pub review: ReviewService,
    pub statistics: StatisticsService,
    cache: CacheHandle,
    pool: Option<Pool>,
    shutdown_tx: watch::Sender<bool>,
    purge_handle: Option<JoinHandle<Arc<PurgeMetrics>>>,
}

impl AppState {
    /// Build against PostgreSQL, creating the schema if needed.
    pub async fn build(config: ServiceConfig) -> ServiceResult<Self> {
        let pool = config.db.create_pool()?;
        ensure_schema(&pool).await?;
        let store: Arc<dyn InstructionStore> = Arc::new(PgInstructionStore::new(pool.clone()));
        let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool.clone()));
        Self::assemble(config, store, users, Some(pool))
    }

    /// Build over in-memory stores. The cache backend still follows `config`.
    pub fn in_memory(config: ServiceConfig) -> ServiceResult<Self> {
        Self::assemble(
            config,
            Arc::new(InMemoryInstructionStore::new()),
            Arc::new(InMemoryUserDirectory::new()),
            None,
        )
    }

    fn assemble(
        config: ServiceConfig,
        store: Arc<dyn InstructionStore>,
        users: Arc<dyn UserDirectory>,
        pool: Option<Pool>,
    ) -> ServiceResult<Self> {
        config.core.validate().map_err(AlpacaError::from)?;
        let cache = CacheHandle::open(&config.cache)?;
        let repository =
            InstructionRepository::new(store, cache.as_store(), users, config.core.list_cache_ttl);

        let core = Arc::new(config.core.clone());
        let review = ReviewService::new(repository.clone(), core.clone());
        let statistics = StatisticsService::new(repository.clone(), core);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            repository,
            review,
            statistics,
            cache,
            pool,
            shutdown_tx,
            purge_handle: None,
        })
    }

    /// Spawn the purge job on the current runtime. A second call is a no-op.
    pub fn start_jobs(&mut self) {
        if self.purge_handle.is_some() {
            return;
        }
        let purge_config = PurgeConfig::from_core(&self.config.core);
        let handle = tokio::spawn(purge_task(
            self.repository.clone(),
            purge_config,
            self.shutdown_tx.subscribe(),
        ));
        self.purge_handle = Some(handle);
    }

    /// Stop jobs, close the pool and flush the cache.
    pub async fn shutdown(mut self) -> ServiceResult<()> {
        // Fails only when no job is subscribed.
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.purge_handle.take() {
            match handle.await {
                Ok(metrics) => tracing::debug!(
                    purged = metrics.snapshot().records_purged,
                    "Purge job joined"
                ),
                Err(e) => tracing::warn!(error = %e, "Purge job did not stop cleanly"),
            }
        }

        if let Some(pool) = self.pool.take() {
            pool.close();
        }

        if let CacheHandle::Lmdb(store) = &self.cache {
            store
                .sync()
                .map_err(|e| ServiceError::from(AlpacaError::from(e)))?;
        }

        tracing::info!("Alpaca service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Caller, RequestContext};
    use crate::types::SubmitRecordRequest;
    use alpaca_core::new_entity_id;

    #[tokio::test]
    async fn test_in_memory_state_serves_requests() {
        let mut state =
            AppState::in_memory(ServiceConfig::development()).expect("state should build");
        state.start_jobs();

        let ctx = RequestContext::for_caller(Caller::user(new_entity_id(), "alice"));
        let record = state
            .review
            .submit(
                &ctx,
                SubmitRecordRequest {
                    instruction: "Name a colour".to_string(),
                    output: "Blue".to_string(),
                    source: "self".to_string(),
                    ..SubmitRecordRequest::default()
                },
            )
            .await
            .expect("submit should succeed");
        assert_eq!(record.theme, "default");

        state.shutdown().await.expect("shutdown should succeed");
    }

    #[tokio::test]
    async fn test_lmdb_cache_is_synced_on_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServiceConfig::development();
        config.cache = CacheBackendKind::Lmdb {
            path: dir.path().to_path_buf(),
            max_size_mb: 16,
        };
        let state = AppState::in_memory(config).expect("state should build");
        state.shutdown().await.expect("shutdown should succeed");
    }
}
