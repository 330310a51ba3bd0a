//! flight-etl - periodic OpenSky aircraft-state refresher
//!
//! Pulls live state vectors from the OpenSky REST API, cleans them, checks their quality,
//! appends them to a SQLite table and optionally mirrors each batch to Google Sheets
//! and CSV snapshots.

pub mod config;
pub mod exporter;
pub mod extractor;
pub mod flight_state;
pub mod health_check;
pub mod instance_lock;
pub mod loader;
pub mod log_format;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod shutdown;
pub mod transformer;
pub mod validator;

pub use config::Config;
pub use exporter::{CsvSnapshotExporter, ExportError, FlightExporter, GoogleSheetsExporter};
pub use extractor::{ExtractError, FlightSource, OpenSkyExtractor};
pub use flight_state::{FlightState, RawFlightState};
pub use loader::{FlightStore, SqliteStore, StoreError, StoreStats, WriteMode};
pub use pipeline::{IterationReport, Pipeline, PipelineSettings, RunnerState, Stage};
pub use retry::RetryPolicy;
pub use validator::{DataQualityError, Validator};

/// Version from `git describe`, or the package version outside a git checkout
pub fn version() -> &'static str {
    match option_env!("VERGEN_GIT_DESCRIBE") {
        Some(describe) if describe != "VERGEN_IDEMPOTENT_OUTPUT" => describe,
        _ => env!("CARGO_PKG_VERSION"),
    }
}
