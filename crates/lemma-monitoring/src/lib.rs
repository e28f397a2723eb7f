//! Monitoring module for the Lemma platform.
//!
//! Provides logging initialisation and the metrics hooks the scheduler
//! reports through. Everything is emitted via `tracing`; exporters are
//! left to the host process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

pub mod logging;
pub mod metrics;

pub use crate::logging::init_logging;
pub use crate::metrics::{SchedulerMetrics, TracingMetricsCollector};

/// Type of metric for collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    /// Counter metrics accumulate values
    Counter,
    /// Gauge metrics record current values
    Gauge,
    /// Histogram metrics observe distributions
    Histogram,
}

/// Interface for collecting metrics
pub trait MetricsCollector: Send + Sync {
    /// Record a metric with the given name, value, type, and labels
    fn record_metric(
        &self,
        name: &str,
        value: f64,
        metric_type: MetricType,
        labels: HashMap<String, String>,
    );
}

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to every log line
    pub service_name: String,
    /// Enable metrics
    pub enable_metrics: bool,
    /// Log level filter (e.g., "info,lemma_core=debug")
    pub log_filter: String,
    /// Emit JSON instead of human readable logs
    pub enable_json_logging: bool,
    /// Environment (dev, staging, prod)
    pub environment: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "lemma".to_string(),
            enable_metrics: true,
            log_filter: "info".to_string(),
            enable_json_logging: false,
            environment: "dev".to_string(),
        }
    }
}

/// Initialize monitoring system
pub fn init(config: MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(&config)?;

    info!(
        service_name = %config.service_name,
        environment = %config.environment,
        metrics = config.enable_metrics,
        "Monitoring initialized"
    );

    Ok(())
}
