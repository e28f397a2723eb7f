//! Scheduler metrics.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::{MetricType, MetricsCollector};

/// Collector that writes every metric as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsCollector;

impl MetricsCollector for TracingMetricsCollector {
    fn record_metric(
        &self,
        name: &str,
        value: f64,
        metric_type: MetricType,
        labels: HashMap<String, String>,
    ) {
        info!(
            metric = name,
            value,
            metric_type = ?metric_type,
            labels = ?labels,
            "metric"
        );
    }
}

/// Scheduler specific metrics
#[derive(Clone)]
pub struct SchedulerMetrics {
    collector: Arc<dyn MetricsCollector>,
    enabled: bool,
}

impl SchedulerMetrics {
    /// Create metrics reporting into `collector`
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self {
            collector,
            enabled: true,
        }
    }

    /// Metrics that record nothing
    pub fn disabled() -> Self {
        Self {
            collector: Arc::new(TracingMetricsCollector),
            enabled: false,
        }
    }

    /// Record a finished service call
    pub fn record_service_call(&self, service: &str, module: &str, duration_ms: f64, outcome: &str) {
        if !self.enabled {
            return;
        }
        let labels = HashMap::from([
            ("service".to_string(), service.to_string()),
            ("module".to_string(), module.to_string()),
            ("outcome".to_string(), outcome.to_string()),
        ]);
        self.collector
            .record_metric("service_calls_total", 1.0, MetricType::Counter, labels.clone());
        self.collector.record_metric(
            "service_call_duration_ms",
            duration_ms,
            MetricType::Histogram,
            labels,
        );
    }

    /// Record how long a process waited for a module lock
    pub fn record_lock_wait(&self, module: &str, wait_ms: f64) {
        if !self.enabled {
            return;
        }
        let labels = HashMap::from([("module".to_string(), module.to_string())]);
        self.collector
            .record_metric("module_lock_wait_ms", wait_ms, MetricType::Histogram, labels);
    }

    /// Record a cascade invalidation and the number of modules it reset
    pub fn record_cascade_invalidation(&self, module: &str, reset_modules: usize) {
        if !self.enabled {
            return;
        }
        let labels = HashMap::from([("module".to_string(), module.to_string())]);
        self.collector.record_metric(
            "cascade_invalidated_modules",
            reset_modules as f64,
            MetricType::Counter,
            labels,
        );
    }

    /// Record the number of running service processes
    pub fn record_running_processes(&self, count: usize) {
        if !self.enabled {
            return;
        }
        self.collector.record_metric(
            "running_service_processes",
            count as f64,
            MetricType::Gauge,
            HashMap::new(),
        );
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new(Arc::new(TracingMetricsCollector))
    }
}

impl std::fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerMetrics")
            .field("enabled", &self.enabled)
            .finish()
    }
}
