use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "hotelbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "hotelbook_query_duration_seconds";

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "hotelbook_bookings_created_total";

/// Counter: booking attempts refused by the engine. Labels: kind.
pub const BOOKING_REJECTIONS_TOTAL: &str = "hotelbook_booking_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "hotelbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hotelbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hotelbook_connections_rejected_total";

/// Counter: logins refused for an unknown user.
pub const AUTH_FAILURES_TOTAL: &str = "hotelbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hotelbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hotelbook_wal_flush_batch_size";

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
        Command::InsertHotel { .. } => "insert_hotel",
        Command::InsertRoomType { .. } => "insert_room_type",
        Command::InsertRoom { .. } => "insert_room",
        Command::InsertBooking { .. } => "insert_booking",
        Command::SelectAvailableRooms { .. } => "select_available_rooms",
        Command::SelectBookingByReference { .. } => "select_booking",
        Command::SelectRoomBookings { .. } => "select_room_bookings",
        Command::SelectHotels { .. } => "select_hotels",
        Command::DeleteHotels => "delete_hotels",
        Command::SeedDemo => "seed_demo",
    }
}
