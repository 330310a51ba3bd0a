//! Best-effort mirrors of loaded batches.
//!
//! Exporters run after a successful load. Their failures are logged and reported as
//! `false`; they never fail the iteration.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::flight_state::FlightState;

pub mod csv_snapshot;
pub mod sheets;

pub use csv_snapshot::CsvSnapshotExporter;
pub use sheets::{GoogleSheetsExporter, SheetWriteMode};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("credentials file not found: {}", .0.display())]
    CredentialsNotFound(PathBuf),

    #[error("invalid credentials file: {0}")]
    InvalidCredentials(String),

    #[error("failed to sign service account assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("spreadsheet not found: {0}")]
    SpreadsheetNotFound(String),

    #[error("worksheet `{worksheet}` not found in spreadsheet {spreadsheet_id}")]
    WorksheetNotFound {
        spreadsheet_id: String,
        worksheet: String,
    },

    #[error("{context} returned HTTP {status}: {body}")]
    Api {
        context: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid endpoint url: {0}")]
    Url(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),
}

/// Destination that mirrors persisted batches
#[async_trait]
pub trait FlightExporter: Send + Sync {
    /// Short name used in logs and iteration reports
    fn name(&self) -> &str;

    /// Export the batch. Empty batches are a no-op that returns `false`.
    async fn export(&self, batch: &[FlightState]) -> bool;
}
