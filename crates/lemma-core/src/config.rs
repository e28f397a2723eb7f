//! Scheduler configuration
//!
//! Defaults can be overridden through `LEMMA_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::CoreError;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound for one wait on a contended module lock, in milliseconds
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    /// Keep result payloads of finished calls in the call history
    #[serde(default = "default_retain_payloads")]
    pub retain_payloads: bool,

    /// Maximum number of finished calls kept in the history, 0 keeps all
    #[serde(default)]
    pub max_retained_calls: usize,

    /// Emit scheduler metrics
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
}

fn default_lock_poll_interval_ms() -> u64 {
    100
}

fn default_retain_payloads() -> bool {
    true
}

fn default_enable_metrics() -> bool {
    true
}

impl SchedulerConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn load() -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Ok(interval) = env::var("LEMMA_LOCK_POLL_INTERVAL_MS") {
            if let Ok(interval) = interval.parse::<u64>() {
                config.lock_poll_interval_ms = interval;
            } else {
                warn!("Invalid LEMMA_LOCK_POLL_INTERVAL_MS value: {}", interval);
            }
        }

        if let Ok(retain) = env::var("LEMMA_RETAIN_PAYLOADS") {
            config.retain_payloads = retain.to_lowercase() == "true" || retain == "1";
        }

        if let Ok(max_calls) = env::var("LEMMA_MAX_RETAINED_CALLS") {
            if let Ok(max_calls) = max_calls.parse::<usize>() {
                config.max_retained_calls = max_calls;
            } else {
                warn!("Invalid LEMMA_MAX_RETAINED_CALLS value: {}", max_calls);
            }
        }

        if let Ok(metrics) = env::var("LEMMA_ENABLE_METRICS") {
            config.enable_metrics = metrics.to_lowercase() == "true" || metrics == "1";
        }

        config.validate()?;

        info!(
            lock_poll_interval_ms = config.lock_poll_interval_ms,
            retain_payloads = config.retain_payloads,
            max_retained_calls = config.max_retained_calls,
            "Loaded scheduler configuration"
        );
        Ok(config)
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.lock_poll_interval_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "Lock poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll interval as a duration
    #[inline]
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            retain_payloads: default_retain_payloads(),
            max_retained_calls: 0,
            enable_metrics: default_enable_metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(100));
        assert!(config.retain_payloads);
        assert_eq!(config.max_retained_calls, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "lock_poll_interval_ms": 25 }"#).unwrap();
        assert_eq!(config.lock_poll_interval_ms, 25);
        assert!(config.retain_payloads);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = SchedulerConfig {
            lock_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::ConfigurationError(_))
        ));
    }
}
