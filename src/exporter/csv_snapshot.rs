use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::{ExportError, FlightExporter};
use crate::flight_state::FlightState;

/// Writes every exported batch to its own timestamped CSV file
#[derive(Debug, Clone)]
pub struct CsvSnapshotExporter {
    dir: PathBuf,
}

impl CsvSnapshotExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `opensky_flights_<YYYY-mm-dd_HH-MM-SS>.csv` inside the export directory
    pub fn snapshot_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("opensky_flights_{}.csv", at.format("%Y-%m-%d_%H-%M-%S")))
    }

    /// Write `batch` with a header row to `path`, creating the directory if needed
    pub fn write_snapshot(&self, batch: &[FlightState], path: &Path) -> Result<u64, ExportError> {
        std::fs::create_dir_all(&self.dir)?;

        let mut writer = ::csv::Writer::from_path(path)?;
        writer.write_record(FlightState::COLUMNS)?;
        for state in batch {
            writer.write_record(state.to_cells())?;
        }
        writer.flush()?;

        Ok(std::fs::metadata(path)?.len())
    }
}

#[async_trait]
impl FlightExporter for CsvSnapshotExporter {
    fn name(&self) -> &str {
        "csv"
    }

    async fn export(&self, batch: &[FlightState]) -> bool {
        if batch.is_empty() {
            warn!("No data to export to CSV");
            return false;
        }

        let path = self.snapshot_path(Utc::now());
        let exporter = self.clone();
        let rows = batch.to_vec();
        let target = path.clone();
        let result =
            tokio::task::spawn_blocking(move || exporter.write_snapshot(&rows, &target)).await;

        match result {
            Ok(Ok(bytes)) => {
                info!(
                    "CSV snapshot written: {} ({:.2} KB, {} rows)",
                    path.display(),
                    bytes as f64 / 1024.0,
                    batch.len()
                );
                true
            }
            Ok(Err(e)) => {
                error!("Failed to write CSV snapshot {}: {}", path.display(), e);
                false
            }
            Err(e) => {
                error!("CSV snapshot task failed: {}", e);
                false
            }
        }
    }
}
