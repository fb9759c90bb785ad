use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotwise_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotwise_query_duration_seconds";

/// Counter: booking writes or checks rejected by an overlapping booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotwise_booking_conflicts_total";

/// Counter: hostnames that did not resolve to an active tenant.
pub const TENANT_RESOLVE_FAILURES_TOTAL: &str = "slotwise_tenant_resolve_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "slotwise_connections_active";
pub const CONNECTIONS_TOTAL: &str = "slotwise_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotwise_connections_rejected_total";

/// Gauge: number of tenant engines loaded in memory.
pub const TENANTS_ACTIVE: &str = "slotwise_tenants_active";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

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
        Command::InsertTenant { .. } => "insert_tenant",
        Command::UpdateTenantDomain { .. } => "update_tenant_domain",
        Command::UpdateTenantActive { .. } => "update_tenant_active",
        Command::SelectTenant { .. } => "select_tenant",
        Command::InsertStaff { .. } => "insert_staff",
        Command::DeleteStaff { .. } => "delete_staff",
        Command::InsertSchedules { .. } => "insert_schedules",
        Command::DeleteSchedule { .. } => "delete_schedule",
        Command::InsertOverrides { .. } => "insert_overrides",
        Command::DeleteOverride { .. } => "delete_override",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectConflict { .. } => "select_conflict",
        Command::SelectStaff => "select_staff",
        Command::SelectSchedules { .. } => "select_schedules",
        Command::SelectOverrides { .. } => "select_overrides",
        Command::SelectBookings { .. } => "select_bookings",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}
