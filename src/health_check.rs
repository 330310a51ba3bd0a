//! Pre-flight probes for the pipeline's dependencies.
//!
//! A failed probe is reported, never raised: the pipeline may still run with a degraded
//! dependency, and the `health` command turns the report into an exit status.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::loader::SqliteStore;

/// Timeout for the source API probe
pub const API_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of every probe, keyed by check name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub checks: BTreeMap<&'static str, bool>,
}

impl HealthReport {
    pub fn record(&mut self, check: &'static str, healthy: bool) {
        self.checks.insert(check, healthy);
    }

    pub fn all_healthy(&self) -> bool {
        self.checks.values().all(|healthy| *healthy)
    }

    /// Names of the failed checks
    pub fn failed(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// `true` when `url` answers 200 within `timeout`
pub async fn check_api_health(url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Could not build HTTP client for API health check: {}", e);
            return false;
        }
    };

    match client.get(url).send().await {
        Ok(response) if response.status() == reqwest::StatusCode::OK => true,
        Ok(response) => {
            warn!("API health check: {} returned HTTP {}", url, response.status());
            false
        }
        Err(e) => {
            warn!("API health check: {} unreachable: {}", url, e);
            false
        }
    }
}

/// `true` when the store opens and answers a trivial query.
///
/// A store that does not exist yet is healthy; the first load creates it.
pub async fn check_store_health(path: &Path) -> bool {
    if !path.exists() {
        info!("Store {} does not exist yet, it will be created on first load", path.display());
        return true;
    }

    let store = SqliteStore::new(path);
    match tokio::task::spawn_blocking(move || store.probe()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            warn!("Store health check: {} unusable: {}", path.display(), e);
            false
        }
        Err(e) => {
            error!("Store health check task failed: {}", e);
            false
        }
    }
}

pub fn check_credentials_file(path: &Path) -> bool {
    let exists = path.is_file();
    if !exists {
        warn!("Credentials file not found: {}", path.display());
    }
    exists
}

/// Run every probe. Credentials are only checked when a path is given.
pub async fn system_health_check(
    api_url: &str,
    store_path: &Path,
    credentials_path: Option<&Path>,
) -> HealthReport {
    info!("Running system health checks");

    let mut report = HealthReport::default();
    report.record("api", check_api_health(api_url, API_PROBE_TIMEOUT).await);
    report.record("database", check_store_health(store_path).await);
    if let Some(path) = credentials_path {
        report.record("credentials", check_credentials_file(path));
    }

    let failed = report.failed();
    if failed.is_empty() {
        info!("All health checks passed");
    } else {
        for check in &failed {
            warn!("Health check failed: {}", check);
        }
        warn!("{} of {} health checks failed", failed.len(), report.checks.len());
    }

    report
}
