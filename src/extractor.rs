use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::flight_state::RawFlightState;
use crate::retry::RetryPolicy;

/// Default OpenSky endpoint returning every tracked aircraft
pub const DEFAULT_API_URL: &str = "https://opensky-network.org/api/states/all";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("malformed payload from {url}: {reason}")]
    MalformedPayload { url: String, reason: String },
}

impl ExtractError {
    /// Network, timeout and status failures are worth another attempt; a payload we
    /// cannot parse will not get better by asking again
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractError::MalformedPayload { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExtractError::Timeout { .. })
    }
}

/// Source of raw aircraft-state batches
#[async_trait]
pub trait FlightSource: Send + Sync {
    /// Fetch one snapshot. An empty batch means "no traffic" and is not an error.
    async fn extract(&self) -> Result<Vec<RawFlightState>, ExtractError>;
}

/// `/states/all` response body
#[derive(Debug, Deserialize)]
struct StatesResponse {
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    states: Option<Vec<Vec<serde_json::Value>>>,
}

/// OpenSky REST client
pub struct OpenSkyExtractor {
    client: Client,
    api_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OpenSkyExtractor {
    pub fn new(
        api_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flight-etl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            timeout,
            retry,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Single GET without retries
    async fn fetch_once(&self, attempt: u32) -> Result<Vec<RawFlightState>, ExtractError> {
        info!(
            "Extracting aircraft states from {} (attempt {}/{})",
            self.api_url, attempt, self.retry.max_attempts
        );

        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::HttpStatus {
                url: self.api_url.clone(),
                status,
            });
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        parse_states(&self.api_url, &body)
    }

    fn classify(&self, source: reqwest::Error) -> ExtractError {
        if source.is_timeout() {
            ExtractError::Timeout {
                url: self.api_url.clone(),
                timeout: self.timeout,
            }
        } else {
            ExtractError::Transport {
                url: self.api_url.clone(),
                source,
            }
        }
    }
}

#[async_trait]
impl FlightSource for OpenSkyExtractor {
    async fn extract(&self) -> Result<Vec<RawFlightState>, ExtractError> {
        let result = self
            .retry
            .run(
                "OpenSky extraction",
                |attempt| self.fetch_once(attempt),
                ExtractError::is_retryable,
            )
            .await;

        match &result {
            Ok(states) if !states.is_empty() => info!("Extracted {} aircraft states", states.len()),
            Ok(_) => {}
            Err(e) if e.is_timeout() => error!("Timeout while contacting the OpenSky API: {}", e),
            Err(e) => error!("OpenSky extraction failed: {}", e),
        }

        result
    }
}

/// Decode a `/states/all` body into raw states.
///
/// A missing, null or empty `states` field yields an empty batch.
pub fn parse_states(url: &str, body: &str) -> Result<Vec<RawFlightState>, ExtractError> {
    let malformed = |reason: String| ExtractError::MalformedPayload {
        url: url.to_string(),
        reason,
    };

    let response: StatesResponse =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let rows = match response.states {
        Some(rows) if !rows.is_empty() => rows,
        _ => {
            warn!("No aircraft states returned by {}", url);
            return Ok(Vec::new());
        }
    };

    debug!(
        "Snapshot time {:?} with {} state vectors",
        response.time,
        rows.len()
    );

    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            RawFlightState::from_state_vector(row)
                .map_err(|e| malformed(format!("state vector {}: {}", index, e)))
        })
        .collect()
}
