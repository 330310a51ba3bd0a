//! Google Sheets mirror of the loaded batch.
//!
//! Authentication uses a service-account key: an RS256-signed assertion is exchanged for
//! a short-lived bearer token, which then authorises the Sheets v4 REST calls.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{ExportError, FlightExporter};
use crate::flight_state::FlightState;

pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scopes requested for the service account
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The parts of a Google service-account key file the exporter needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, ExportError> {
        if !path.exists() {
            return Err(ExportError::CredentialsNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| ExportError::InvalidCredentials(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// How rows land in the worksheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SheetWriteMode {
    /// Clear the worksheet, then write a header row followed by the batch
    #[default]
    FullWithHeader,
    /// Append the batch below existing content, without a header
    AppendOnly,
}

impl FromStr for SheetWriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::FullWithHeader),
            "append" => Ok(Self::AppendOnly),
            other => Err(format!(
                "unknown sheets mode `{other}` (expected `full` or `append`)"
            )),
        }
    }
}

impl fmt::Display for SheetWriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullWithHeader => write!(f, "full"),
            Self::AppendOnly => write!(f, "append"),
        }
    }
}

pub struct GoogleSheetsExporter {
    spreadsheet_id: String,
    credentials_path: PathBuf,
    worksheet: String,
    mode: SheetWriteMode,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleSheetsExporter {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        credentials_path: impl Into<PathBuf>,
        worksheet: impl Into<String>,
        mode: SheetWriteMode,
    ) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            credentials_path: credentials_path.into(),
            worksheet: worksheet.into(),
            mode,
            base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the exporter at a different Sheets API host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn mode(&self) -> SheetWriteMode {
        self.mode
    }

    async fn access_token(&self, key: &ServiceAccountKey) -> Result<String, ExportError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: SCOPES.join(" "),
            aud: &key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?;

        let response = self
            .client
            .post(&key.token_uri)
            .timeout(REQUEST_TIMEOUT)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = check_status(response, "token exchange").await?;
        let token: TokenResponse = response.json().await?;

        debug!("Obtained Google access token for {}", key.client_email);
        Ok(token.access_token)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ExportError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ExportError::Url(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ExportError::Url(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
            .extend(segments);
        Ok(url)
    }

    /// Quoted worksheet name, usable on its own or as an A1 range prefix
    fn worksheet_range(&self) -> String {
        format!("'{}'", self.worksheet.replace('\'', "''"))
    }

    async fn ensure_worksheet(&self, token: &str) -> Result<(), ExportError> {
        let url = self.endpoint(&[])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ExportError::SpreadsheetNotFound(self.spreadsheet_id.clone()));
        }
        let response = check_status(response, "spreadsheet lookup").await?;
        let metadata: SpreadsheetMetadata = response.json().await?;

        if metadata
            .sheets
            .iter()
            .any(|sheet| sheet.properties.title == self.worksheet)
        {
            Ok(())
        } else {
            Err(ExportError::WorksheetNotFound {
                spreadsheet_id: self.spreadsheet_id.clone(),
                worksheet: self.worksheet.clone(),
            })
        }
    }

    /// Clear every row from `first_row` (1-based) down
    async fn clear_from(&self, token: &str, first_row: usize) -> Result<(), ExportError> {
        let range = format!("{}!A{}:ZZ:clear", self.worksheet_range(), first_row);
        let url = self.endpoint(&["values", &range])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({}))
            .send()
            .await?;
        check_status(response, "clear").await?;
        Ok(())
    }

    async fn write_from_top(&self, token: &str, rows: Vec<Vec<Value>>) -> Result<(), ExportError> {
        let range = format!("{}!A1", self.worksheet_range());
        let url = self.endpoint(&["values", &range])?;
        let response = self
            .client
            .put(url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": rows }))
            .send()
            .await?;
        check_status(response, "update").await?;
        Ok(())
    }

    async fn append(&self, token: &str, rows: Vec<Vec<Value>>) -> Result<(), ExportError> {
        let range = format!("{}:append", self.worksheet_range());
        let url = self.endpoint(&["values", &range])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "majorDimension": "ROWS", "values": rows }))
            .send()
            .await?;
        check_status(response, "append").await?;
        Ok(())
    }

    /// Full export, surfacing the first error
    pub async fn try_export(&self, batch: &[FlightState]) -> Result<usize, ExportError> {
        let key = ServiceAccountKey::from_file(&self.credentials_path)?;
        let token = self.access_token(&key).await?;
        self.ensure_worksheet(&token).await?;

        let rows: Vec<Vec<Value>> = batch.iter().map(row_values).collect();
        match self.mode {
            SheetWriteMode::FullWithHeader => {
                // Overwrite in place, then drop leftovers of a longer previous snapshot.
                // A failed write leaves the previous snapshot intact.
                let mut values = Vec::with_capacity(rows.len() + 1);
                values.push(FlightState::COLUMNS.iter().map(|c| json!(c)).collect());
                values.extend(rows);
                let written = values.len();
                self.write_from_top(&token, values).await?;
                self.clear_from(&token, written + 1).await?;
            }
            SheetWriteMode::AppendOnly => self.append(&token, rows).await?,
        }

        Ok(batch.len())
    }
}

#[async_trait]
impl FlightExporter for GoogleSheetsExporter {
    fn name(&self) -> &str {
        "google_sheets"
    }

    async fn export(&self, batch: &[FlightState]) -> bool {
        if batch.is_empty() {
            warn!("No data to export to Google Sheets");
            return false;
        }

        match self.try_export(batch).await {
            Ok(rows) => {
                info!(
                    "Exported {} rows to Google Sheets worksheet '{}' ({} mode)",
                    rows, self.worksheet, self.mode
                );
                true
            }
            Err(e) => {
                error!("Google Sheets export failed: {}", e);
                false
            }
        }
    }
}

/// Cells for one row. Numbers and booleans keep their JSON type; absent values are blank.
fn row_values(state: &FlightState) -> Vec<Value> {
    fn opt<T: Into<Value>>(value: Option<T>) -> Value {
        value.map(Into::into).unwrap_or_else(|| json!(""))
    }

    let cells = state.to_cells();
    vec![
        opt(state.icao24.clone()),
        opt(state.callsign.clone()),
        opt(state.origin_country.clone()),
        json!(cells[3]),
        json!(cells[4]),
        opt(state.longitude),
        opt(state.latitude),
        opt(state.baro_altitude),
        opt(state.on_ground),
        opt(state.velocity),
        opt(state.true_track),
        opt(state.vertical_rate),
        json!(cells[12]),
        opt(state.geo_altitude),
        opt(state.squawk.clone()),
        opt(state.spi),
        opt(state.position_source),
        json!(state.altitude_feet),
        json!(cells[18]),
    ]
}

async fn check_status(
    response: reqwest::Response,
    context: &'static str,
) -> Result<reqwest::Response, ExportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ExportError::Api {
        context,
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sheet_write_mode_parsing() {
        assert_eq!(
            "full".parse::<SheetWriteMode>(),
            Ok(SheetWriteMode::FullWithHeader)
        );
        assert_eq!(
            " Append ".parse::<SheetWriteMode>(),
            Ok(SheetWriteMode::AppendOnly)
        );
        assert!("overwrite".parse::<SheetWriteMode>().is_err());
    }

    #[test]
    fn test_endpoint_escapes_range() {
        let exporter = GoogleSheetsExporter::new(
            "sheet123",
            "credentials.json",
            "Bob's flights",
            SheetWriteMode::AppendOnly,
        )
        .with_base_url("http://127.0.0.1:9000/");

        let range = format!("{}:append", exporter.worksheet_range());
        assert_eq!(range, "'Bob''s flights':append");

        let url = exporter.endpoint(&["values", &range]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/v4/spreadsheets/sheet123/values/'Bob''s%20flights':append"
        );
    }

    #[test]
    fn test_missing_credentials_file() {
        let err = ServiceAccountKey::from_file(Path::new("/nonexistent/credentials.json"))
            .unwrap_err();
        assert!(matches!(err, ExportError::CredentialsNotFound(_)));
    }

    #[test]
    fn test_row_values_keep_types_and_blank_nulls() {
        let state = FlightState {
            icao24: Some("abc123".to_string()),
            callsign: None,
            origin_country: Some("Norway".to_string()),
            time_position: None,
            last_contact: None,
            longitude: Some(10.5),
            latitude: Some(59.9),
            baro_altitude: None,
            on_ground: Some(true),
            velocity: None,
            true_track: None,
            vertical_rate: None,
            sensors: Some(vec![7]),
            geo_altitude: None,
            squawk: None,
            spi: None,
            position_source: Some(0),
            altitude_feet: 0.0,
            processed_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };

        let values = row_values(&state);
        assert_eq!(values.len(), FlightState::COLUMNS.len());
        assert_eq!(values[0], json!("abc123"));
        assert_eq!(values[1], json!(""));
        assert_eq!(values[5], json!(10.5));
        assert_eq!(values[8], json!(true));
        assert_eq!(values[12], json!("[7]"));
        assert_eq!(values[16], json!(0));
        assert_eq!(values[18], json!("2024-01-02T03:04:05.000000Z"));
    }
}
