use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "meetbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "meetbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "meetbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "meetbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "meetbook_connections_rejected_total";

/// Counter: statements from a login user with no account.
pub const AUTH_FAILURES_TOTAL: &str = "meetbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "meetbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "meetbook_wal_flush_batch_size";

// ── Booking lifecycle ───────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "meetbook_bookings_created_total";
pub const BOOKINGS_CANCELLED_TOTAL: &str = "meetbook_bookings_cancelled_total";
pub const BOOKINGS_EXPIRED_TOTAL: &str = "meetbook_bookings_expired_total";

/// Counter: booking or reschedule requests refused for overlap.
pub const BOOKING_CONFLICTS_TOTAL: &str = "meetbook_booking_conflicts_total";

/// Counter: bookings cancelled by the compliance sweeper.
pub const SWEEP_CANCELLED_TOTAL: &str = "meetbook_sweep_cancelled_total";

/// Counter: confirmation mails the mailer refused.
pub const MAIL_FAILURES_TOTAL: &str = "meetbook_mail_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::UpdateUser { .. } => "update_user",
        Command::DeleteUser { .. } => "delete_user",
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectUsers { .. } => "select_users",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectFrequentBookers { .. } => "select_frequent_bookers",
        Command::Sweep => "sweep",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
