//! Background Jobs
//!
//! - `purge`: removes records soft-deleted longer than the retention period
//!
//! # Usage
//!
//! ```ignore
//! use alpaca_service::jobs::{purge_task, PurgeConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(purge_task(repository.clone(), PurgeConfig::from_core(&config), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod purge;

pub use purge::{purge_task, run_purge_cycle, PurgeConfig, PurgeMetrics, PurgeSnapshot};
