use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};

use crate::exporter::{CsvSnapshotExporter, FlightExporter, GoogleSheetsExporter, SheetWriteMode};
use crate::extractor::DEFAULT_API_URL;
use crate::loader::{DEFAULT_TABLE, WriteMode, validate_table_name};
use crate::pipeline::PipelineSettings;
use crate::retry::RetryPolicy;

/// Process configuration, read from environment variables (and `.env`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub database_path: PathBuf,
    pub table: String,
    pub write_mode: WriteMode,
    pub google_sheet_id: String,
    pub google_credentials_path: PathBuf,
    pub google_worksheet_name: String,
    pub google_sheets_mode: SheetWriteMode,
    pub csv_export_dir: Option<PathBuf>,
    pub cycle_interval: Duration,
    pub max_retries: u32,
    pub timeout: Duration,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub sentry_dsn: Option<String>,
    pub enable_google_sheets_export: bool,
    pub enable_health_check: bool,
    pub enable_validation: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let table = string_or("DATABASE_TABLE", DEFAULT_TABLE);
        validate_table_name(&table).context("DATABASE_TABLE")?;

        let cycle_interval_secs: u64 = parse_or(&get, "CYCLE_INTERVAL_SECONDS", 3600)?;
        if cycle_interval_secs == 0 {
            bail!("CYCLE_INTERVAL_SECONDS must be greater than zero");
        }

        let max_retries: u32 = parse_or(&get, "MAX_RETRIES", 3)?;
        if max_retries == 0 {
            bail!("MAX_RETRIES must be greater than zero");
        }

        let timeout_secs: u64 = parse_or(&get, "TIMEOUT_SECONDS", 10)?;

        let metrics_port = get("METRICS_PORT")
            .map(|v| {
                v.parse::<u16>()
                    .with_context(|| format!("METRICS_PORT: invalid port `{}`", v))
            })
            .transpose()?;

        Ok(Self {
            api_url: string_or("OPENSKY_API_URL", DEFAULT_API_URL),
            database_path: PathBuf::from(string_or("DATABASE_PATH", "data/flights.db")),
            table,
            write_mode: parse_or(&get, "DB_IF_EXISTS", WriteMode::Append)?,
            google_sheet_id: string_or("GOOGLE_SHEET_ID", ""),
            google_credentials_path: PathBuf::from(string_or(
                "GOOGLE_CREDENTIALS_PATH",
                "credentials.json",
            )),
            google_worksheet_name: string_or("GOOGLE_WORKSHEET_NAME", "flights"),
            google_sheets_mode: parse_or(
                &get,
                "GOOGLE_SHEETS_MODE",
                SheetWriteMode::FullWithHeader,
            )?,
            csv_export_dir: get("CSV_EXPORT_DIR").map(PathBuf::from),
            cycle_interval: Duration::from_secs(cycle_interval_secs),
            max_retries,
            timeout: Duration::from_secs(timeout_secs),
            log_level: parse_log_level(&string_or("LOG_LEVEL", "info"))?,
            log_file: get("LOG_FILE").map(PathBuf::from),
            metrics_port,
            sentry_dsn: get("SENTRY_DSN"),
            enable_google_sheets_export: bool_or(&get, "ENABLE_GOOGLE_SHEETS_EXPORT", false)?,
            enable_health_check: bool_or(&get, "ENABLE_HEALTH_CHECK", true)?,
            enable_validation: bool_or(&get, "ENABLE_VALIDATION", true)?,
        })
    }

    /// Sheets export is wired only when the flag is on and a spreadsheet is configured
    pub fn sheets_export_configured(&self) -> bool {
        self.enable_google_sheets_export && !self.google_sheet_id.is_empty()
    }

    /// Credentials file the health check should look for, if Sheets export is wired
    pub fn health_credentials_path(&self) -> Option<&Path> {
        self.sheets_export_configured()
            .then_some(self.google_credentials_path.as_path())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_retries)
    }

    pub fn pipeline_settings(&self, once: bool, dry_run: bool) -> PipelineSettings {
        PipelineSettings {
            table: self.table.clone(),
            write_mode: self.write_mode,
            validate: self.enable_validation,
            dry_run,
            once,
            interval: self.cycle_interval,
        }
    }

    /// Exporters to register, in the order they run
    pub fn exporters(&self) -> Vec<Arc<dyn FlightExporter>> {
        let mut exporters: Vec<Arc<dyn FlightExporter>> = Vec::new();

        if self.sheets_export_configured() {
            exporters.push(Arc::new(GoogleSheetsExporter::new(
                self.google_sheet_id.clone(),
                self.google_credentials_path.clone(),
                self.google_worksheet_name.clone(),
                self.google_sheets_mode,
            )));
        } else if self.enable_google_sheets_export {
            warn!(
                "Google Sheets export is enabled but GOOGLE_SHEET_ID is not set, skipping export"
            );
        } else {
            info!("Google Sheets export disabled");
        }

        if let Some(dir) = &self.csv_export_dir {
            exporters.push(Arc::new(CsvSnapshotExporter::new(dir.clone())));
        }

        exporters
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  API URL: {}", self.api_url);
        info!("  Database: {}", self.database_path.display());
        info!("  Table: {} ({} mode)", self.table, self.write_mode);
        info!("  Cycle interval: {}s", self.cycle_interval.as_secs());
        info!("  Max retries: {}", self.max_retries);
        info!("  Timeout: {}s", self.timeout.as_secs());
        info!("  Log level: {}", self.log_level);
        if let Some(log_file) = &self.log_file {
            info!("  Log file: {}", log_file.display());
        }
        info!("  Validation: {}", enabled(self.enable_validation));
        info!("  Health check: {}", enabled(self.enable_health_check));
        info!(
            "  Google Sheets export: {}",
            enabled(self.enable_google_sheets_export)
        );
        if self.enable_google_sheets_export {
            info!("    Sheet ID: {}", mask_sheet_id(&self.google_sheet_id));
            info!("    Worksheet: {}", self.google_worksheet_name);
            info!("    Mode: {}", self.google_sheets_mode);
            info!("    Credentials: {}", self.google_credentials_path.display());
        }
        if let Some(dir) = &self.csv_export_dir {
            info!("  CSV snapshots: {}", dir.display());
        }
        if let Some(port) = self.metrics_port {
            info!("  Metrics port: {}", port);
        }
    }
}

fn enabled(flag: bool) -> &'static str {
    if flag { "enabled" } else { "disabled" }
}

/// First 10 characters of the spreadsheet id, or a placeholder when unset
pub fn mask_sheet_id(id: &str) -> String {
    if id.is_empty() {
        return "<not set>".to_string();
    }
    let prefix: String = id.chars().take(10).collect();
    format!("{}...", prefix)
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("{}: invalid value `{}`: {}", key, value, e)),
        None => Ok(default),
    }
}

/// Normalise `LOG_LEVEL` to a `tracing` level name. `WARNING` and `CRITICAL` are accepted
/// as aliases so existing deployment files keep working.
fn parse_log_level(value: &str) -> Result<String> {
    let level = match value.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    };
    if LevelFilter::from_str(&level).is_err() {
        bail!("LOG_LEVEL: invalid level `{}`", value);
    }
    Ok(level)
}

fn bool_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => bail!("{}: invalid boolean `{}`", key, value),
        },
        None => Ok(default),
    }
}
