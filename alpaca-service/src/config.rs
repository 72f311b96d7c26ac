//! Service Configuration Module
//!
//! Configuration is loaded from `ALPACA_*` environment variables with
//! development defaults. Unparseable values fall back to the default.

use std::path::PathBuf;
use std::time::Duration;

use alpaca_core::{AlpacaConfig, ConfigError};

use crate::constants::{
    DEFAULT_CACHE_MAX_SIZE_MB, DEFAULT_CACHE_PATH, DEFAULT_LIST_CACHE_TTL_SECS,
    DEFAULT_OPERATION_TIMEOUT_MS, DEFAULT_PURGE_INTERVAL_SECS, DEFAULT_PURGE_RETENTION_SECS,
    DEFAULT_THEME,
};
use crate::db::DbConfig;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// CACHE BACKEND
// ============================================================================

/// Which cache store backs the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Persistent LMDB store at `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
    /// Process-local store.
    Memory,
}

impl CacheBackendKind {
    /// Environment variables:
    /// - `ALPACA_CACHE_BACKEND`: "lmdb" or "memory" (default: lmdb)
    /// - `ALPACA_CACHE_PATH`: LMDB directory (default: ./data/cache)
    /// - `ALPACA_CACHE_MAX_SIZE_MB`: LMDB map size (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        let kind = std::env::var("ALPACA_CACHE_BACKEND").unwrap_or_else(|_| "lmdb".to_string());
        match kind.trim().to_lowercase().as_str() {
            "memory" => Ok(CacheBackendKind::Memory),
            "lmdb" => Ok(CacheBackendKind::Lmdb {
                path: std::env::var("ALPACA_CACHE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_PATH)),
                max_size_mb: env_parse("ALPACA_CACHE_MAX_SIZE_MB")
                    .unwrap_or(DEFAULT_CACHE_MAX_SIZE_MB),
            }),
            other => Err(ConfigError::InvalidValue {
                field: "ALPACA_CACHE_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected 'lmdb' or 'memory'".to_string(),
            }),
        }
    }
}

// ============================================================================
// LOG FORMAT
// ============================================================================

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// `ALPACA_LOG_FORMAT`: "json" or "pretty" (default: pretty)
    pub fn from_env() -> Self {
        match std::env::var("ALPACA_LOG_FORMAT")
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Everything the composition root needs to build the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub core: AlpacaConfig,
    pub cache: CacheBackendKind,
    pub db: DbConfig,
    pub log_format: LogFormat,
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ALPACA_LIST_CACHE_TTL_SECS`: list cache entry TTL (default: 300)
    /// - `ALPACA_OPERATION_TIMEOUT_MS`: default request deadline (default: 5000)
    /// - `ALPACA_DEFAULT_THEME`: theme placeholder (default: "default")
    /// - `ALPACA_PURGE_RETENTION_SECS`: soft-delete retention (default: 30 days)
    /// - `ALPACA_PURGE_INTERVAL_SECS`: purge job period (default: 3600)
    /// - plus the cache, database and log variables of their own sections
    pub fn from_env() -> Result<Self, ConfigError> {
        let core = AlpacaConfig {
            list_cache_ttl: Duration::from_secs(
                env_parse("ALPACA_LIST_CACHE_TTL_SECS").unwrap_or(DEFAULT_LIST_CACHE_TTL_SECS),
            ),
            operation_timeout: Duration::from_millis(
                env_parse("ALPACA_OPERATION_TIMEOUT_MS").unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
            ),
            default_theme: std::env::var("ALPACA_DEFAULT_THEME")
                .unwrap_or_else(|_| DEFAULT_THEME.to_string()),
            purge_retention: Duration::from_secs(
                env_parse("ALPACA_PURGE_RETENTION_SECS").unwrap_or(DEFAULT_PURGE_RETENTION_SECS),
            ),
            purge_interval: Duration::from_secs(
                env_parse("ALPACA_PURGE_INTERVAL_SECS").unwrap_or(DEFAULT_PURGE_INTERVAL_SECS),
            ),
            ..AlpacaConfig::default()
        };
        core.validate()?;

        Ok(Self {
            core,
            cache: CacheBackendKind::from_env()?,
            db: DbConfig::from_env(),
            log_format: LogFormat::from_env(),
        })
    }

    /// In-memory everything, default timings. Used by tests and local runs.
    pub fn development() -> Self {
        Self {
            core: AlpacaConfig::default(),
            cache: CacheBackendKind::Memory,
            db: DbConfig::default(),
            log_format: LogFormat::Pretty,
        }
    }
}
