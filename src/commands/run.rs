use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

use flight_etl::health_check::system_health_check;
use flight_etl::instance_lock::InstanceLock;
use flight_etl::shutdown::install_signal_handlers;
use flight_etl::{Config, OpenSkyExtractor, Pipeline, RunnerState, SqliteStore};

pub async fn handle_run(config: &Config, once: bool, dry_run: bool) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "run");
    });

    info!("Starting flight-etl {}", flight_etl::version());
    config.log_summary();

    if config.enable_health_check {
        let report = system_health_check(
            &config.api_url,
            &config.database_path,
            config.health_credentials_path(),
        )
        .await;
        if !report.all_healthy() {
            warn!(
                "Continuing despite failed health checks: {}",
                report.failed().join(", ")
            );
        }
    }

    let _instance_lock = InstanceLock::for_store_in_runtime_dir(&config.database_path)?;

    let extractor = OpenSkyExtractor::new(&config.api_url, config.timeout, config.retry_policy())
        .context("Failed to build OpenSky client")?;
    let store = SqliteStore::new(&config.database_path);

    let mut pipeline = Pipeline::new(
        Arc::new(extractor),
        Arc::new(store),
        config.pipeline_settings(once, dry_run),
    );
    for exporter in config.exporters() {
        pipeline = pipeline.with_exporter(exporter);
    }
    if !pipeline.exporter_names().is_empty() {
        info!("Exporters: {}", pipeline.exporter_names().join(", "));
    }

    // Initialise before the server starts so the first scrape already sees every series
    if let Some(port) = config.metrics_port {
        let handle = flight_etl::metrics::init_metrics()?;
        flight_etl::metrics::initialize_pipeline_metrics(&pipeline.exporter_names());
        tokio::spawn(
            flight_etl::metrics::start_metrics_server(port, handle)
                .instrument(tracing::info_span!("metrics_server")),
        );
    }

    let stop = CancellationToken::new();
    install_signal_handlers(stop.clone())?;

    let mut state = RunnerState::with_stop_token(stop);
    pipeline.run(&mut state).await;

    Ok(())
}
