use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tracing::info;

/// Install the global Prometheus recorder and return its render handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Register every tracker metric at zero so dashboards show them before the
/// first cycle completes. Call after the recorder is installed.
pub fn initialize_tracker_metrics() {
    for outcome in ["no_flights", "none_in_region", "persisted", "failed"] {
        metrics::counter!("tracker_cycles_total", "outcome" => outcome).absolute(0);
    }
    metrics::counter!("tracker_flights_fetched_total").absolute(0);
    metrics::counter!("tracker_flights_in_region_total").absolute(0);
    metrics::counter!("tracker_observations_persisted_total").absolute(0);
    metrics::counter!("tracker_observations_failed_total").absolute(0);
    metrics::gauge!("tracker_last_cycle_timestamp_seconds").set(0.0);

    metrics::counter!("aviation_api_retries_total").absolute(0);
    metrics::counter!("aviation_api_failures_total").absolute(0);
    metrics::counter!("aviation_api_undecodable_records_total").absolute(0);

    for stage in ["connect", "aircraft", "observation"] {
        metrics::counter!("database_retries_total", "stage" => stage).absolute(0);
    }
}

/// Serve `/metrics` for Prometheus scraping until the process exits.
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {addr}"))?;

    axum::serve(listener, app)
        .await
        .context("Metrics server failed")
}
