//! Google Sheets exporter against in-process fake token and Sheets endpoints
mod common;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use common::{flight_state, spawn_server};
use flight_etl::exporter::{FlightExporter, GoogleSheetsExporter, SheetWriteMode};

const SPREADSHEET_ID: &str = "1TestSpreadsheetId";
const ACCESS_TOKEN: &str = "ya29.test-token";

#[derive(Debug, Clone)]
struct Call {
    method: &'static str,
    range: String,
    query: HashMap<String, String>,
    body: Value,
}

#[derive(Clone, Default)]
struct FakeGoogle {
    calls: Arc<Mutex<Vec<Call>>>,
    token_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    reject_updates: bool,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", ACCESS_TOKEN))
}

async fn token(
    State(fake): State<FakeGoogle>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    fake.token_requests.lock().unwrap().push(form);
    Json(json!({ "access_token": ACCESS_TOKEN, "token_type": "Bearer", "expires_in": 3600 }))
}

async fn spreadsheet(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if id != SPREADSHEET_ID {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({
        "sheets": [
            { "properties": { "title": "Summary" } },
            { "properties": { "title": "flights" } }
        ]
    }))
    .into_response()
}

async fn record(
    fake: FakeGoogle,
    method: &'static str,
    range: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Value,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    fake.calls.lock().unwrap().push(Call {
        method,
        range,
        query,
        body,
    });
    Json(json!({})).into_response()
}

async fn values_post(
    State(fake): State<FakeGoogle>,
    Path((_id, range)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(fake, "POST", range, query, headers, body).await
}

async fn values_put(
    State(fake): State<FakeGoogle>,
    Path((_id, range)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let reject = fake.reject_updates;
    let response = record(fake, "PUT", range, query, headers, body).await;
    if reject {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    response
}

async fn fake_google() -> (FakeGoogle, SocketAddr) {
    serve_fake(FakeGoogle::default()).await
}

async fn serve_fake(fake: FakeGoogle) -> (FakeGoogle, SocketAddr) {
    let app = Router::new()
        .route("/token", post(token))
        .route("/v4/spreadsheets/{id}", get(spreadsheet))
        .route(
            "/v4/spreadsheets/{id}/values/{range}",
            post(values_post).put(values_put),
        )
        .with_state(fake.clone());
    let addr = spawn_server(app).await;
    (fake, addr)
}

fn write_credentials(dir: &TempDir, addr: SocketAddr) -> PathBuf {
    let private_key = std::fs::read_to_string(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/test_service_account_key.pem"
    ))
    .unwrap();
    let credentials = json!({
        "type": "service_account",
        "project_id": "flight-etl-test",
        "client_email": "exporter@flight-etl-test.iam.gserviceaccount.com",
        "private_key": private_key,
        "token_uri": format!("http://{}/token", addr),
    });
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, credentials.to_string()).unwrap();
    path
}

fn exporter(
    spreadsheet_id: &str,
    credentials: PathBuf,
    worksheet: &str,
    mode: SheetWriteMode,
    addr: SocketAddr,
) -> GoogleSheetsExporter {
    GoogleSheetsExporter::new(spreadsheet_id, credentials, worksheet, mode)
        .with_base_url(format!("http://{}", addr))
}

#[tokio::test]
async fn test_full_mode_writes_header_and_rows_then_clears_below() {
    let (fake, addr) = fake_google().await;
    let temp_dir = TempDir::new().unwrap();
    let credentials = write_credentials(&temp_dir, addr);
    let exporter = exporter(
        SPREADSHEET_ID,
        credentials,
        "flights",
        SheetWriteMode::FullWithHeader,
        addr,
    );

    let batch = vec![flight_state("3c6444", 50.03, 8.57), flight_state("4b1814", 47.46, 8.55)];
    assert!(exporter.export(&batch).await);

    let token_requests = fake.token_requests.lock().unwrap().clone();
    assert_eq!(token_requests.len(), 1);
    assert_eq!(
        token_requests[0].get("grant_type").map(String::as_str),
        Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
    );
    assert_eq!(
        token_requests[0]
            .get("assertion")
            .map(|jwt| jwt.split('.').count()),
        Some(3)
    );

    let calls = fake.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);

    assert_eq!(calls[0].method, "PUT");
    assert_eq!(calls[0].range, "'flights'!A1");
    assert_eq!(calls[0].query.get("valueInputOption").map(String::as_str), Some("RAW"));
    let rows = calls[0].body["values"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], json!("icao24"));
    assert_eq!(rows[0][18], json!("processed_at"));
    assert_eq!(rows[1][0], json!("3c6444"));
    assert_eq!(rows[1][6], json!(50.03));
    assert_eq!(rows[2][0], json!("4b1814"));

    // Header plus two rows occupy 1..=3; everything from row 4 down is stale
    assert_eq!(calls[1].method, "POST");
    assert_eq!(calls[1].range, "'flights'!A4:ZZ:clear");
}

#[tokio::test]
async fn test_full_mode_failed_write_leaves_sheet_uncleared() {
    let (fake, addr) = serve_fake(FakeGoogle {
        reject_updates: true,
        ..Default::default()
    })
    .await;
    let temp_dir = TempDir::new().unwrap();
    let credentials = write_credentials(&temp_dir, addr);
    let exporter = exporter(
        SPREADSHEET_ID,
        credentials,
        "flights",
        SheetWriteMode::FullWithHeader,
        addr,
    );

    assert!(!exporter.export(&[flight_state("3c6444", 50.03, 8.57)]).await);

    let calls = fake.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "PUT");
}

#[tokio::test]
async fn test_append_mode_appends_rows_without_header() {
    let (fake, addr) = fake_google().await;
    let temp_dir = TempDir::new().unwrap();
    let credentials = write_credentials(&temp_dir, addr);
    let exporter = exporter(
        SPREADSHEET_ID,
        credentials,
        "flights",
        SheetWriteMode::AppendOnly,
        addr,
    );

    assert!(exporter.export(&[flight_state("3c6444", 50.03, 8.57)]).await);

    let calls = fake.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].range, "'flights':append");
    assert_eq!(
        calls[0].query.get("insertDataOption").map(String::as_str),
        Some("INSERT_ROWS")
    );
    let rows = calls[0].body["values"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], json!("3c6444"));
}

#[tokio::test]
async fn test_missing_credentials_returns_false() {
    let (fake, addr) = fake_google().await;
    let temp_dir = TempDir::new().unwrap();
    let exporter = exporter(
        SPREADSHEET_ID,
        temp_dir.path().join("missing.json"),
        "flights",
        SheetWriteMode::FullWithHeader,
        addr,
    );

    assert!(!exporter.export(&[flight_state("3c6444", 50.03, 8.57)]).await);
    assert!(fake.token_requests.lock().unwrap().is_empty());
    assert!(fake.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_spreadsheet_returns_false() {
    let (fake, addr) = fake_google().await;
    let temp_dir = TempDir::new().unwrap();
    let credentials = write_credentials(&temp_dir, addr);
    let exporter = exporter(
        "no-such-sheet",
        credentials,
        "flights",
        SheetWriteMode::FullWithHeader,
        addr,
    );

    assert!(!exporter.export(&[flight_state("3c6444", 50.03, 8.57)]).await);
    assert!(fake.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_worksheet_returns_false() {
    let (fake, addr) = fake_google().await;
    let temp_dir = TempDir::new().unwrap();
    let credentials = write_credentials(&temp_dir, addr);
    let exporter = exporter(
        SPREADSHEET_ID,
        credentials,
        "archive",
        SheetWriteMode::AppendOnly,
        addr,
    );

    assert!(!exporter.export(&[flight_state("3c6444", 50.03, 8.57)]).await);
    assert!(fake.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_batch_returns_false_without_requests() {
    let (fake, addr) = fake_google().await;
    let temp_dir = TempDir::new().unwrap();
    let credentials = write_credentials(&temp_dir, addr);
    let exporter = exporter(
        SPREADSHEET_ID,
        credentials,
        "flights",
        SheetWriteMode::FullWithHeader,
        addr,
    );

    assert!(!exporter.export(&[]).await);
    assert!(fake.token_requests.lock().unwrap().is_empty());
}
