use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics for scraping
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        // Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s
        .set_buckets_for_metric(
            Matcher::Full("data_reader.fetch_duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
        )
        .context("Failed to set buckets for data_reader.fetch_duration_seconds")?
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    Ok(handle)
}

/// Background task to update process metrics
/// Updates uptime and memory usage metrics every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status")
                && let Some(kb) = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<f64>().ok())
            {
                metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Initialize server and reader metrics to zero.
/// This ensures metrics always appear in Prometheus queries even if no events have occurred
pub fn initialize_nav_metrics() {
    // Data reader
    metrics::counter!("data_reader.connect_attempts_total").absolute(0);
    metrics::counter!("data_reader.packets_total").absolute(0);
    metrics::counter!("data_reader.weather_packets_total").absolute(0);
    metrics::counter!("data_reader.errors_total").absolute(0);
    metrics::gauge!("data_reader.connected").set(0.0);

    // Server and workers
    metrics::gauge!("nav_server.connections.active").set(0.0);
    metrics::counter!("nav_server.connections.accepted_total").absolute(0);
    metrics::counter!("nav_server.connections.closed_total").absolute(0);
    metrics::counter!("nav_server.packets_sent_total").absolute(0);
    metrics::counter!("nav_server.bytes_sent_total").absolute(0);
    metrics::counter!("nav_server.packets_dropped_total").absolute(0);
    metrics::counter!("nav_server.replies_received_total").absolute(0);
    metrics::counter!("nav_server.protocol_errors_total").absolute(0);

    // Recording
    metrics::counter!("replay.packets_written_total").absolute(0);
}

/// Serve `/metrics` on all interfaces until the process exits
pub async fn start_metrics_server(port: u16) -> Result<()> {
    let handle = init_metrics()?;
    if METRICS_HANDLE.set(handle).is_err() {
        anyhow::bail!("Metrics handle already initialized");
    }
    initialize_nav_metrics();

    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(|| async {
            METRICS_HANDLE
                .get()
                .map(|handle| handle.render())
                .unwrap_or_default()
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?;
    info!("Starting metrics server on http://{}/metrics", addr);

    axum::serve(listener, app)
        .await
        .context("Metrics server failed")
}
