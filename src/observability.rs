use std::net::SocketAddr;

use crate::sql::Command;

// ── Allocation ──────────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (`booked` or a failure code).
pub const BOOKINGS_TOTAL: &str = "docslot_bookings_total";

/// Histogram: end-to-end booking latency in seconds, store round trips included.
pub const BOOKING_DURATION_SECONDS: &str = "docslot_booking_duration_seconds";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "docslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "docslot_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "docslot_connections_active";

pub const CONNECTIONS_TOTAL: &str = "docslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "docslot_connections_rejected_total";

/// Gauge: number of open tenant registries.
pub const TENANTS_ACTIVE: &str = "docslot_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "docslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "docslot_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a parsed command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertDoctor { .. } => "insert_doctor",
        Command::SelectDoctors { .. } => "select_doctors",
        Command::BookAppointment { .. } => "book_appointment",
        Command::SelectSummary => "select_summary",
        Command::ResetAppointments => "reset_appointments",
    }
}
