//! Iteration driver: extract, transform, validate, load, export; and the cycle loop
//! that repeats it until a stop is requested.

use futures_util::FutureExt;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::exporter::FlightExporter;
use crate::extractor::{ExtractError, FlightSource};
use crate::loader::{DEFAULT_TABLE, FlightStore, WriteMode};
use crate::transformer::transform;
use crate::validator::Validator;

/// Where an iteration currently is, or where it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Extracting,
    Transforming,
    Validating,
    Loading,
    Exporting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "IDLE",
            Stage::Extracting => "EXTRACTING",
            Stage::Transforming => "TRANSFORMING",
            Stage::Validating => "VALIDATING",
            Stage::Loading => "LOADING",
            Stage::Exporting => "EXPORTING",
            Stage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Process-local state shared by the loop and the signal handlers
#[derive(Debug, Default)]
pub struct RunnerState {
    pub iteration_count: u64,
    stop: CancellationToken,
}

impl RunnerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build around an existing token, e.g. one already handed to signal handlers
    pub fn with_stop_token(stop: CancellationToken) -> Self {
        Self {
            iteration_count: 0,
            stop,
        }
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub table: String,
    pub write_mode: WriteMode,
    /// Run the validation stage
    pub validate: bool,
    /// Stop after validation: nothing is loaded or exported
    pub dry_run: bool,
    /// Exit the loop after the first iteration
    pub once: bool,
    pub interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            write_mode: WriteMode::Append,
            validate: true,
            dry_run: false,
            once: false,
            interval: Duration::from_secs(3600),
        }
    }
}

/// Outcome of one iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    /// Stage the iteration ended in; [`Stage::Done`] unless it failed part-way
    pub stage: Stage,
    pub success: bool,
    pub extracted: usize,
    pub transformed: usize,
    pub loaded: usize,
    pub row_count: Option<i64>,
    /// Exporter name and whether its export succeeded
    pub exports: Vec<(String, bool)>,
}

impl IterationReport {
    fn new(iteration: u64) -> Self {
        Self {
            iteration,
            stage: Stage::Idle,
            success: false,
            extracted: 0,
            transformed: 0,
            loaded: 0,
            row_count: None,
            exports: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("{} -> {}", self.stage, stage);
        self.stage = stage;
    }
}

#[derive(Debug, thiserror::Error)]
enum IterationError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("no aircraft states extracted")]
    NoData,

    #[error("no usable rows after transformation")]
    NothingTransformed,

    #[error("data validation failed")]
    ValidationFailed,

    #[error("loading into table `{0}` failed")]
    LoadFailed(String),
}

pub struct Pipeline {
    source: Arc<dyn FlightSource>,
    validator: Validator,
    store: Arc<dyn FlightStore>,
    exporters: Vec<Arc<dyn FlightExporter>>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn FlightSource>,
        store: Arc<dyn FlightStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            validator: Validator::default(),
            store,
            exporters: Vec::new(),
            settings,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Register an exporter; exporters run in registration order after a successful load
    pub fn with_exporter(mut self, exporter: Arc<dyn FlightExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn exporter_names(&self) -> Vec<&str> {
        self.exporters.iter().map(|e| e.name()).collect()
    }

    /// Run one iteration. Never fails: errors and panics become a failed report.
    pub async fn run_iteration(&self, state: &mut RunnerState) -> IterationReport {
        state.iteration_count += 1;
        let iteration = state.iteration_count;
        let span = info_span!("iteration", iteration);
        let started = Instant::now();

        metrics::counter!("pipeline_iterations_total").increment(1);

        let mut report = IterationReport::new(iteration);
        let outcome = AssertUnwindSafe(self.execute(&mut report).instrument(span.clone()))
            .catch_unwind()
            .await;

        let _entered = span.enter();
        match outcome {
            Ok(Ok(())) => {
                report.success = true;
                report.enter(Stage::Done);
                info!(
                    "Iteration {} succeeded in {:.2}s ({} extracted, {} transformed, {} loaded)",
                    iteration,
                    started.elapsed().as_secs_f64(),
                    report.extracted,
                    report.transformed,
                    report.loaded
                );
            }
            Ok(Err(e)) => {
                error!(
                    "Iteration {} failed during {}: {}",
                    iteration, report.stage, e
                );
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "Iteration {} aborted by unexpected error during {}: {}",
                    iteration, report.stage, message
                );
            }
        }

        if !report.success {
            metrics::counter!("pipeline_iterations_failed_total").increment(1);
        }
        metrics::histogram!("pipeline_iteration_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        report
    }

    async fn execute(&self, report: &mut IterationReport) -> Result<(), IterationError> {
        report.enter(Stage::Extracting);
        let raw = self.source.extract().await?;
        report.extracted = raw.len();
        metrics::counter!("pipeline_records_extracted_total").increment(raw.len() as u64);
        if raw.is_empty() {
            return Err(IterationError::NoData);
        }

        report.enter(Stage::Transforming);
        let batch = transform(raw);
        report.transformed = batch.len();
        if batch.is_empty() {
            return Err(IterationError::NothingTransformed);
        }

        if self.settings.validate {
            report.enter(Stage::Validating);
            if !self.validator.validate(&batch) {
                return Err(IterationError::ValidationFailed);
            }
        } else {
            debug!("Validation disabled, skipping");
        }

        if self.settings.dry_run {
            info!("Dry run: skipping load and export of {} rows", batch.len());
            return Ok(());
        }

        report.enter(Stage::Loading);
        let table = &self.settings.table;
        if !self
            .store
            .load(&batch, table, self.settings.write_mode)
            .await
        {
            return Err(IterationError::LoadFailed(table.clone()));
        }
        report.loaded = batch.len();
        metrics::counter!("pipeline_records_loaded_total").increment(batch.len() as u64);

        if let Some(stats) = self.store.get_stats(table).await {
            info!("Table {} now holds {} rows", stats.table, stats.row_count);
            metrics::gauge!("pipeline_store_row_count").set(stats.row_count as f64);
            report.row_count = Some(stats.row_count);
        }

        if !self.exporters.is_empty() {
            report.enter(Stage::Exporting);
            for exporter in &self.exporters {
                let exported = exporter.export(&batch).await;
                if !exported {
                    warn!("Export to {} failed, continuing", exporter.name());
                    metrics::counter!(
                        "pipeline_export_failures_total",
                        "exporter" => exporter.name().to_string()
                    )
                    .increment(1);
                }
                report.exports.push((exporter.name().to_string(), exported));
            }
        }

        Ok(())
    }

    /// Cycle loop. Returns once a stop is requested, or after one iteration in run-once mode.
    pub async fn run(&self, state: &mut RunnerState) {
        let stop = state.stop_token();

        info!(
            "Starting pipeline: interval {:?}, table {}, {} mode{}{}",
            self.settings.interval,
            self.settings.table,
            self.settings.write_mode,
            if self.settings.once { ", run once" } else { "" },
            if self.settings.dry_run { ", dry run" } else { "" }
        );

        loop {
            if state.stop_requested() {
                info!("Stop requested, not starting another iteration");
                break;
            }

            self.run_iteration(state).await;

            if self.settings.once {
                info!("Run-once mode, exiting after a single iteration");
                break;
            }

            if state.stop_requested() {
                info!("Stop requested, skipping sleep");
                break;
            }

            info!(
                "Next iteration in {} seconds",
                self.settings.interval.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = stop.cancelled() => {
                    info!("Stop requested during sleep");
                    break;
                }
            }
        }

        let stop_requested = if state.stop_requested() { 1.0 } else { 0.0 };
        metrics::gauge!("pipeline_stop_requested").set(stop_requested);
        info!(
            "Pipeline stopped after {} iteration(s)",
            state.iteration_count
        );
    }
}
