//! Prometheus metrics for controllers
//!
//! Provides observability into reconcile throughput, failures and queueing.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup; later calls are no-ops. If another recorder is
/// already installed the failure is logged and `/metrics` stays empty.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_ok() {
                info!("Prometheus metrics initialized");
            }
        }
        Err(e) => warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Metrics helper bound to one controller
#[derive(Clone)]
pub struct ControllerMetrics {
    controller: String,
    kind: &'static str,
}

impl ControllerMetrics {
    pub fn new(controller: impl Into<String>, kind: &'static str) -> Self {
        Self {
            controller: controller.into(),
            kind,
        }
    }

    /// Record a watch event, and whether the filter let it through
    pub fn event_received(&self, event: &str, accepted: bool) {
        counter!(
            "reconcile_worker_events_total",
            "controller" => self.controller.clone(),
            "kind" => self.kind,
            "event" => event.to_string(),
            "accepted" => if accepted { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn reconcile_succeeded(&self, duration: Duration) {
        counter!(
            "reconcile_worker_reconciles_total",
            "controller" => self.controller.clone(),
            "kind" => self.kind,
            "result" => "success"
        )
        .increment(1);

        self.record_duration(duration);
    }

    pub fn reconcile_failed(&self, category: &str, duration: Duration) {
        counter!(
            "reconcile_worker_reconciles_total",
            "controller" => self.controller.clone(),
            "kind" => self.kind,
            "result" => "error"
        )
        .increment(1);

        counter!(
            "reconcile_worker_errors_total",
            "controller" => self.controller.clone(),
            "kind" => self.kind,
            "category" => category.to_string()
        )
        .increment(1);

        self.record_duration(duration);
    }

    pub fn requeued(&self) {
        counter!(
            "reconcile_worker_requeues_total",
            "controller" => self.controller.clone(),
            "kind" => self.kind
        )
        .increment(1);
    }

    /// Key dropped after exhausting retries or on a permanent error
    pub fn dropped(&self) {
        counter!(
            "reconcile_worker_dropped_total",
            "controller" => self.controller.clone(),
            "kind" => self.kind
        )
        .increment(1);
    }

    pub fn in_flight(&self, count: usize) {
        gauge!(
            "reconcile_worker_in_flight",
            "controller" => self.controller.clone()
        )
        .set(count as f64);
    }

    fn record_duration(&self, duration: Duration) {
        histogram!(
            "reconcile_worker_reconcile_duration_seconds",
            "controller" => self.controller.clone(),
            "kind" => self.kind
        )
        .record(duration.as_secs_f64());
    }
}
