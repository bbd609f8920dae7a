use std::net::SocketAddr;

use crate::sql::{Command, ViewKind};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "listboard_queries_total";

/// Histogram: query latency in seconds (parse + recompute + encode). Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "listboard_query_duration_seconds";

/// Counter: queries whose view came back empty. Labels: command.
pub const EMPTY_RESULTS_TOTAL: &str = "listboard_empty_results_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "listboard_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "listboard_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "listboard_connections_rejected_total";

/// Gauge: number of live dashboard sessions.
pub const SESSIONS_ACTIVE: &str = "listboard_sessions_active";

/// Histogram: time to load one snapshot from the data source, in seconds.
pub const SNAPSHOT_LOAD_DURATION_SECONDS: &str = "listboard_snapshot_load_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Select(query) => view_label(query.view),
        Command::Refresh => "refresh",
    }
}

pub fn view_label(view: ViewKind) -> &'static str {
    match view {
        ViewKind::Listings => "listings",
        ViewKind::ListingsByCity => "listings_by_city",
        ViewKind::PriceHistogram => "price_histogram",
        ViewKind::PriceByCity => "price_by_city",
        ViewKind::SurfaceVsPrice => "surface_vs_price",
        ViewKind::CityMap => "city_map",
        ViewKind::CityOverview => "city_overview",
        ViewKind::FilterOptions => "filter_options",
    }
}
