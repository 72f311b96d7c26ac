//! Alpaca Service - review workflow and statistics over instruction data
//!
//! - [`services::ReviewService`]: submission, owner edits and administrator
//!   review of instruction records
//! - [`services::StatisticsService`]: global and per-user status counts with
//!   daily rollups
//! - [`db`]: PostgreSQL document store and user directory
//! - [`jobs`]: periodic purge of soft-deleted records
//! - [`state::AppState`]: wiring and shutdown of all of the above
//!
//! Every operation takes a [`RequestContext`] carrying the caller and the
//! request's cancellation token and deadline.

pub mod config;
pub mod constants;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod validation;

pub use config::{CacheBackendKind, LogFormat, ServiceConfig};
pub use context::{Caller, RequestContext};
pub use db::{DbConfig, PgInstructionStore, PgUserDirectory};
pub use error::{ErrorCode, ServiceError, ServiceResult};
pub use services::{resolve_window, ReviewService, StatisticsService};
pub use state::AppState;
pub use types::*;
