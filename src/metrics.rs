//! Prometheus metrics for reqchain.
//!
//! ## Metrics
//!
//! ### Counters
//! - `reqchain_chains_executed_total` - Chain executions by overall status
//! - `reqchain_links_executed_total` - Link outcomes by terminal state
//! - `reqchain_http_requests_total` - Outbound link requests by method and status
//! - `reqchain_db_operations_total` - Storage operations by name and success
//!
//! ### Histograms
//! - `reqchain_chain_duration_seconds` - Chain execution duration
//! - `reqchain_link_duration_seconds` - Link request duration by method
//!
//! ### Gauges
//! - `reqchain_active_executions` - Currently running chain executions

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter.
///
/// Safe to call more than once. If another recorder is already installed the
/// returned handle renders an empty registry.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = metrics::set_global_recorder(recorder) {
                tracing::warn!("Metrics recorder already installed: {}", e);
            }
            handle
        })
        .clone()
}

/// Render current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

// =============================================================================
// Chain Metrics
// =============================================================================

/// Record a finished chain execution.
pub fn record_chain_execution(status: &str) {
    counter!(
        "reqchain_chains_executed_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record chain execution duration.
pub fn record_chain_duration(duration: Duration, chain_id: &str) {
    histogram!(
        "reqchain_chain_duration_seconds",
        "chain" => chain_id.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Keeps `reqchain_active_executions` raised while alive.
///
/// The gauge drops back when the guard does, including when an execution
/// future is cancelled part way through.
#[must_use = "the gauge is decremented as soon as the guard is dropped"]
pub struct ActiveExecutionGuard(());

impl ActiveExecutionGuard {
    pub fn enter() -> Self {
        gauge!("reqchain_active_executions").increment(1.0);
        Self(())
    }
}

impl Drop for ActiveExecutionGuard {
    fn drop(&mut self) {
        gauge!("reqchain_active_executions").decrement(1.0);
    }
}

// =============================================================================
// Link Metrics
// =============================================================================

/// Record a link reaching a terminal state.
pub fn record_link_execution(state: &str) {
    counter!(
        "reqchain_links_executed_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record an outbound link request.
pub fn record_http_request(method: &str, status_code: u16) {
    counter!(
        "reqchain_http_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);
}

/// Record link request duration.
pub fn record_link_duration(duration: Duration, method: &str) {
    histogram!(
        "reqchain_link_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Storage Metrics
// =============================================================================

/// Record a database operation.
pub fn record_db_operation(operation: &str, success: bool) {
    counter!(
        "reqchain_db_operations_total",
        "operation" => operation.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}
