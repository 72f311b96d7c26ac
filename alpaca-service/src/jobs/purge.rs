//! Soft-Delete Purge Background Task
//!
//! Owner deletes only mark a record `deleted`. This task periodically removes
//! records that have been soft-deleted for longer than the retention period,
//! going through the repository so the list cache is flushed afterwards.
//!
//! # Configuration
//!
//! ```rust
//! use alpaca_service::jobs::PurgeConfig;
//! use std::time::Duration;
//!
//! let config = PurgeConfig {
//!     check_interval: Duration::from_secs(3600),          // Hourly
//!     retention: Duration::from_secs(30 * 24 * 60 * 60),  // 30 days
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alpaca_core::{AlpacaConfig, AlpacaResult};
use alpaca_storage::InstructionRepository;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::constants::{DEFAULT_PURGE_INTERVAL_SECS, DEFAULT_PURGE_RETENTION_SECS};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the purge background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeConfig {
    /// How often to purge (default: 1 hour)
    pub check_interval: Duration,

    /// How long a soft-deleted record is kept (default: 30 days)
    pub retention: Duration,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_PURGE_RETENTION_SECS),
        }
    }
}

impl PurgeConfig {
    /// Interval and retention taken from the service's core configuration.
    pub fn from_core(core: &AlpacaConfig) -> Self {
        Self {
            check_interval: core.purge_interval,
            retention: core.purge_retention,
        }
    }

    /// Short interval and retention for local runs.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            retention: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for purge activity.
#[derive(Debug, Default)]
pub struct PurgeMetrics {
    /// Total records purged since startup
    pub records_purged: AtomicU64,

    /// Total purge cycles completed
    pub purge_cycles: AtomicU64,

    /// Total errors encountered
    pub purge_errors: AtomicU64,
}

impl PurgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> PurgeSnapshot {
        PurgeSnapshot {
            records_purged: self.records_purged.load(Ordering::Relaxed),
            purge_cycles: self.purge_cycles.load(Ordering::Relaxed),
            purge_errors: self.purge_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of purge metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeSnapshot {
    pub records_purged: u64,
    pub purge_cycles: u64,
    pub purge_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Periodically purge expired soft-deleted records until `shutdown_rx` turns
/// `true`. Returns the metrics collected over the task's lifetime.
pub async fn purge_task(
    repo: InstructionRepository,
    config: PurgeConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<PurgeMetrics> {
    let metrics = Arc::new(PurgeMetrics::new());

    let mut purge_interval = interval(config.check_interval);
    purge_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        retention_secs = config.retention.as_secs(),
        "Purge task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Purge task shutting down");
                    break;
                }
            }

            _ = purge_interval.tick() => {
                run_purge_cycle(&repo, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        records_purged = snapshot.records_purged,
        purge_cycles = snapshot.purge_cycles,
        purge_errors = snapshot.purge_errors,
        "Purge task completed"
    );

    metrics
}

/// Perform one purge cycle. Errors are counted, never propagated.
pub async fn run_purge_cycle(
    repo: &InstructionRepository,
    config: &PurgeConfig,
    metrics: &PurgeMetrics,
) -> u64 {
    metrics.purge_cycles.fetch_add(1, Ordering::Relaxed);

    match purge_expired(repo, config.retention).await {
        Ok(0) => {
            tracing::trace!("Purge cycle completed with nothing to purge");
            0
        }
        Ok(purged) => {
            metrics.records_purged.fetch_add(purged, Ordering::Relaxed);
            tracing::info!(purged, "Purge cycle completed");
            purged
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to purge soft-deleted records");
            metrics.purge_errors.fetch_add(1, Ordering::Relaxed);
            0
        }
    }
}

async fn purge_expired(repo: &InstructionRepository, retention: Duration) -> AlpacaResult<u64> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    repo.purge_deleted_before(cutoff).await
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use alpaca_core::{new_entity_id, NewRecord, RecordStatus};
    use alpaca_storage::{InMemoryCacheStore, InMemoryInstructionStore, InMemoryUserDirectory};

    fn repo_with_store() -> (InstructionRepository, Arc<InMemoryInstructionStore>) {
        let store = Arc::new(InMemoryInstructionStore::new());
        let repo = InstructionRepository::new(
            store.clone(),
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryUserDirectory::new()),
            Duration::from_secs(60),
        );
        (repo, store)
    }

    fn new_record() -> NewRecord {
        NewRecord {
            owner_id: new_entity_id(),
            username: "alice".to_string(),
            instruction: "Add 1+1".to_string(),
            input: String::new(),
            output: "2".to_string(),
            theme: "math".to_string(),
            source: "book".to_string(),
            note: None,
            status: RecordStatus::pending(),
        }
    }

    #[test]
    fn test_config_default() {
        let config = PurgeConfig::default();
        assert_eq!(
            config.check_interval,
            Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS)
        );
        assert_eq!(
            config.retention,
            Duration::from_secs(DEFAULT_PURGE_RETENTION_SECS)
        );
    }

    #[test]
    fn test_config_development_and_core() {
        assert_eq!(
            PurgeConfig::development().check_interval,
            Duration::from_secs(10)
        );
        let core = AlpacaConfig {
            purge_interval: Duration::from_secs(120),
            ..AlpacaConfig::default()
        };
        let config = PurgeConfig::from_core(&core);
        assert_eq!(config.check_interval, Duration::from_secs(120));
        assert_eq!(config.retention, core.purge_retention);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = PurgeMetrics::new();
        metrics.records_purged.store(4, Ordering::Relaxed);
        metrics.purge_cycles.store(2, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_purged, 4);
        assert_eq!(snapshot.purge_cycles, 2);
        assert_eq!(snapshot.purge_errors, 0);
    }

    #[tokio::test]
    async fn test_cycle_purges_only_expired_soft_deletes() {
        let (repo, store) = repo_with_store();
        let deleted = repo.insert(new_record()).await.expect("insert should succeed");
        let kept = repo.insert(new_record()).await.expect("insert should succeed");
        repo.soft_delete(deleted.record_id, None)
            .await
            .expect("soft delete should succeed");
        tokio::time::sleep(Duration::from_millis(2)).await;

        let config = PurgeConfig {
            check_interval: Duration::from_secs(1),
            retention: Duration::ZERO,
        };
        let metrics = PurgeMetrics::new();
        let purged = run_purge_cycle(&repo, &config, &metrics).await;

        assert_eq!(purged, 1);
        assert!(store.raw(deleted.record_id).is_none());
        assert!(store.raw(kept.record_id).is_some());
        assert_eq!(metrics.snapshot().records_purged, 1);
    }

    #[tokio::test]
    async fn test_cycle_keeps_recent_soft_deletes() {
        let (repo, store) = repo_with_store();
        let deleted = repo.insert(new_record()).await.expect("insert should succeed");
        repo.soft_delete(deleted.record_id, None)
            .await
            .expect("soft delete should succeed");

        let metrics = PurgeMetrics::new();
        let purged = run_purge_cycle(&repo, &PurgeConfig::default(), &metrics).await;
        assert_eq!(purged, 0);
        assert!(store.raw(deleted.record_id).is_some());
    }

    #[tokio::test]
    async fn test_cycle_counts_errors() {
        let (repo, store) = repo_with_store();
        store.set_unavailable(true);
        let metrics = PurgeMetrics::new();
        run_purge_cycle(&repo, &PurgeConfig::default(), &metrics).await;
        assert_eq!(metrics.snapshot().purge_errors, 1);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let (repo, _store) = repo_with_store();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(purge_task(repo, PurgeConfig::development(), shutdown_rx));

        shutdown_tx.send(true).expect("task should be listening");
        let metrics = handle.await.expect("task should join");
        // The first tick fires immediately.
        assert!(metrics.snapshot().purge_cycles <= 1);
    }
}
