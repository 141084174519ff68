use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "kerb_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "kerb_operation_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: vehicles currently listed.
pub const VEHICLES_ACTIVE: &str = "kerb_vehicles_active";

/// Counter: pending holds cancelled by the expiry sweep.
pub const HOLDS_EXPIRED_TOTAL: &str = "kerb_holds_expired_total";

/// Counter: payment/identity calls that failed or timed out. Labels: call.
pub const GATEWAY_FAILURES_TOTAL: &str = "kerb_gateway_failures_total";

/// Counter: condition anomalies queued for operator review.
pub const INTEGRITY_ALERTS_TOTAL: &str = "kerb_integrity_alerts_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "kerb_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "kerb_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
