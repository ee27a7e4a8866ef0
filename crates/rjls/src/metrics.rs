use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state. Not ready until the listener is bound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the service as ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// # Errors
///
/// Returns an error if binding the metrics HTTP server fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler - returns 200 if server is running.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Readiness check handler - returns 200 if ready, 503 if not.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

/// Gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("rjl_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("rjl_connections_active").decrement(1.0);
    }

    /// Record the current size of the reject list.
    #[allow(clippy::cast_precision_loss)]
    pub fn reject_list_size(len: usize) {
        metrics::gauge!("rjl_reject_list_size").set(len as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the accepted-connections counter.
    pub fn connections_accepted_total() {
        metrics::counter!("rjl_connections_accepted_total").increment(1);
    }

    /// Record a broadcast of the given frame kind.
    pub fn broadcasts_total(kind: &'static str) {
        metrics::counter!("rjl_broadcasts_total", "kind" => kind).increment(1);
    }

    /// Record frames placed on outbound queues by a broadcast.
    pub fn frames_enqueued_total(count: u64) {
        metrics::counter!("rjl_frames_enqueued_total").increment(count);
    }

    /// Increment the evicted-connections counter with the given reason label.
    pub fn evictions_total(reason: &'static str) {
        metrics::counter!("rjl_evictions_total", "reason" => reason).increment(1);
    }

    /// Increment the malformed-frame counter.
    pub fn protocol_errors_total() {
        metrics::counter!("rjl_protocol_errors_total").increment(1);
    }

    /// Record a decision report with the given verdict label.
    pub fn decisions_total(verdict: &'static str) {
        metrics::counter!("rjl_decisions_total", "verdict" => verdict).increment(1);
    }

    /// Increment the failed decision-log writes counter.
    pub fn log_write_failures_total() {
        metrics::counter!("rjl_log_write_failures_total").increment(1);
    }

    /// Record an administrative command with the given command label.
    pub fn admin_commands_total(command: &'static str) {
        metrics::counter!("rjl_admin_commands_total", "command" => command).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record an outbound write latency observation in seconds.
    pub fn write_latency_seconds(value: f64) {
        metrics::histogram!("rjl_write_latency_seconds").record(value);
    }
}
