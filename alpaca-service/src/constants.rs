//! Service-wide constants and defaults.

/// Default lifetime of a cached list page.
pub const DEFAULT_LIST_CACHE_TTL_SECS: u64 = 300;

/// Default deadline for one service operation.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5000;

/// Theme stored when a submission leaves it blank.
pub const DEFAULT_THEME: &str = "default";

/// Soft-deleted records older than this are purged (30 days).
pub const DEFAULT_PURGE_RETENTION_SECS: u64 = 30 * 24 * 60 * 60;

/// Period of the purge job.
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3600;

/// LMDB cache directory.
pub const DEFAULT_CACHE_PATH: &str = "./data/cache";

/// LMDB map size in megabytes.
pub const DEFAULT_CACHE_MAX_SIZE_MB: usize = 256;

/// Page size of the user statistic list when none is given.
pub const DEFAULT_USER_PAGE_SIZE: u64 = 50;

/// Largest user statistic page accepted.
pub const MAX_USER_PAGE_SIZE: u64 = 1000;

/// Page size of a record list when none is given.
pub const DEFAULT_RECORD_PAGE_SIZE: u64 = 20;

/// Largest record list page accepted.
pub const MAX_RECORD_PAGE_SIZE: u64 = 500;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "alpaca_service=debug,alpaca_storage=info,info";
