use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "salonbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "salonbook_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: appointments committed.
pub const APPOINTMENTS_CREATED_TOTAL: &str = "salonbook_appointments_created_total";

/// Counter: writes refused by the engine. Labels: operation, reason.
pub const COMMITS_REJECTED_TOTAL: &str = "salonbook_commits_rejected_total";

/// Counter: reminders recorded as sent.
pub const REMINDERS_SENT_TOTAL: &str = "salonbook_reminders_sent_total";

/// Counter: notification deliveries that failed. Labels: kind.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "salonbook_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "salonbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "salonbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "salonbook_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "salonbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salonbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salonbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None; a
/// failed install is logged and the server runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://{addr}/metrics"),
        Err(e) => tracing::error!(error = %e, "failed to install Prometheus exporter"),
    }
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertBranch { .. } => "upsert_branch",
        Command::InsertCalendarEntry { .. } => "insert_calendar_entry",
        Command::DeleteCalendarEntry { .. } => "delete_calendar_entry",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::Reschedule { .. } => "reschedule",
        Command::ChangeStatus { .. } => "change_status",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::Listen { .. } => "listen",
    }
}
