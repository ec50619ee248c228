use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Lifecycle ───────────────────────────────────────────────────

/// Counter: reservations created (Pending).
pub const RESERVATIONS_CREATED_TOTAL: &str = "staykeep_reservations_created_total";

/// Counter: status transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "staykeep_reservation_transitions_total";

/// Counter: reservations hard-deleted by staff.
pub const RESERVATIONS_REMOVED_TOTAL: &str = "staykeep_reservations_removed_total";

/// Counter: bookings refused for overlapping a blackout, a binding reservation
/// or a property pending payment.
pub const CONFLICTS_TOTAL: &str = "staykeep_conflicts_total";

/// Counter: payment attempts. Labels: status (succeeded, failed).
pub const PAYMENTS_TOTAL: &str = "staykeep_payments_total";

// ── Collaborators ───────────────────────────────────────────────

/// Counter: gateway calls. Labels: op, status.
pub const GATEWAY_CALLS_TOTAL: &str = "staykeep_gateway_calls_total";

/// Histogram: gateway call latency in seconds. Labels: op.
pub const GATEWAY_DURATION_SECONDS: &str = "staykeep_gateway_duration_seconds";

/// Counter: notifications the sink refused.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "staykeep_notification_failures_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Counter: sweep runs. Labels: status.
pub const SWEEP_RUNS_TOTAL: &str = "staykeep_sweep_runs_total";

/// Counter: reservations cancelled by the sweeper.
pub const SWEEP_CANCELLED_TOTAL: &str = "staykeep_sweep_cancelled_total";

/// Histogram: sweep run duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "staykeep_sweep_duration_seconds";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staykeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staykeep_wal_flush_batch_size";

/// Counter: journal compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "staykeep_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
