//! Service Layer
//!
//! Business logic over the instruction-data repository. Services check the
//! caller, enforce the review state machine and classify repository errors.

mod review_service;
mod statistics_service;

pub use review_service::*;
pub use statistics_service::*;
