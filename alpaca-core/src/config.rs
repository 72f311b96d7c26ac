//! Configuration types

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Core behavioural settings shared by the repository, services and jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlpacaConfig {
    /// Lifetime of a cached list envelope.
    pub list_cache_ttl: Duration,
    /// Default deadline applied to a request with no explicit deadline.
    pub operation_timeout: Duration,
    /// Theme stored when a submission leaves it blank.
    pub default_theme: String,
    /// Length of the default statistics window, in days.
    pub rollup_days: u32,
    /// Longest statistics window accepted, in days.
    pub max_rollup_days: u32,
    /// How long a soft-deleted record is kept before the purge job removes it.
    pub purge_retention: Duration,
    /// Period of the purge job.
    pub purge_interval: Duration,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            list_cache_ttl: Duration::from_secs(300),
            operation_timeout: Duration::from_millis(5000),
            default_theme: "default".to_string(),
            rollup_days: 7,
            max_rollup_days: 366,
            purge_retention: Duration::from_secs(30 * 24 * 60 * 60),
            purge_interval: Duration::from_secs(3600),
        }
    }
}

impl AlpacaConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &str, d: Duration| {
            if d.is_zero() {
                Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", d),
                    reason: "must be positive".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("list_cache_ttl", self.list_cache_ttl)?;
        positive("operation_timeout", self.operation_timeout)?;
        positive("purge_interval", self.purge_interval)?;

        if self.default_theme.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "default_theme".to_string(),
                value: self.default_theme.clone(),
                reason: "must not be blank".to_string(),
            });
        }

        if self.rollup_days == 0 || self.rollup_days > self.max_rollup_days {
            return Err(ConfigError::InvalidValue {
                field: "rollup_days".to_string(),
                value: self.rollup_days.to_string(),
                reason: format!("must be between 1 and {}", self.max_rollup_days),
            });
        }

        Ok(())
    }
}
