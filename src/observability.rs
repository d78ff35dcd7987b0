use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: slot queries served. Labels: degraded.
pub const SLOT_QUERIES_TOTAL: &str = "slotkeeper_slot_queries_total";

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "slotkeeper_reservations_total";

/// Histogram: end-to-end reservation latency in seconds.
pub const RESERVATION_DURATION_SECONDS: &str = "slotkeeper_reservation_duration_seconds";

// ── External calendar ──────────────────────────────────────────

/// Counter: busy-source fetches that failed or timed out.
pub const BUSY_SOURCE_FAILURES_TOTAL: &str = "slotkeeper_busy_source_failures_total";

/// Counter: calendar mirror publishes that failed after commit.
pub const CALENDAR_PUBLISH_FAILURES_TOTAL: &str = "slotkeeper_calendar_publish_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotkeeper_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn bool_label(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
