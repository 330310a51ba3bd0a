use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Install the Prometheus recorder and return the handle used to render `/metrics`
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        // Iterations range from sub-second (empty snapshots) to minutes (slow API + retries)
        .set_buckets_for_metric(
            Matcher::Full("pipeline_iteration_duration_seconds".to_string()),
            &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
        )
        .context("Failed to set buckets for pipeline_iteration_duration_seconds")?
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Initialize pipeline metrics to zero so they show up before the first iteration.
///
/// Export failures are labelled by exporter, so one series is created per registered name.
pub fn initialize_pipeline_metrics(exporter_names: &[&str]) {
    metrics::counter!("pipeline_iterations_total").absolute(0);
    metrics::counter!("pipeline_iterations_failed_total").absolute(0);
    metrics::counter!("pipeline_records_extracted_total").absolute(0);
    metrics::counter!("pipeline_records_loaded_total").absolute(0);
    for name in exporter_names {
        metrics::counter!("pipeline_export_failures_total", "exporter" => name.to_string())
            .absolute(0);
    }
    metrics::gauge!("pipeline_store_row_count").set(0.0);
    metrics::gauge!("pipeline_stop_requested").set(0.0);
}

/// Uptime, liveness and resident memory, refreshed every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process_uptime_seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process_is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status")
                && let Some(kb) = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<f64>().ok())
            {
                metrics::gauge!("process_memory_bytes").set(kb * 1024.0);
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Serve `handle` on `0.0.0.0:<port>/metrics` until the process exits
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) {
    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind metrics server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server failed: {}", e);
    }
}
