use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotd_query_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (accepted, unavailable, duplicate).
pub const RESERVATIONS_TOTAL: &str = "slotd_reservations_total";

/// Counter: schedule records materialized from the template.
pub const SCHEDULES_GENERATED_TOTAL: &str = "slotd_schedules_generated_total";

/// Counter: future unbooked records purged after template replacement.
pub const SCHEDULES_PURGED_TOTAL: &str = "slotd_schedules_purged_total";

/// Counter: confirmation dispatch outcomes. Labels: outcome (sent, failed, timeout).
pub const CONFIRMATIONS_TOTAL: &str = "slotd_confirmations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectSchedules => "select_schedules",
        Command::SelectTemplate => "select_template",
        Command::InsertBooking { .. } => "insert_booking",
        Command::ReplaceTemplate { .. } => "replace_template",
        Command::UpdateSlotStatus { .. } => "update_slot_status",
        Command::DeleteFutureUnbooked { .. } => "delete_future_unbooked",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
