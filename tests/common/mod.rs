//! Shared fakes and builders for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use flight_etl::exporter::FlightExporter;
use flight_etl::extractor::{ExtractError, FlightSource};
use flight_etl::loader::{FlightStore, SqliteStore, StoreStats, WriteMode};
use flight_etl::{FlightState, RawFlightState};

/// Serve `app` on an ephemeral localhost port
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// One positional OpenSky state vector
pub fn state_vector(icao24: &str, lat: Option<f64>, lon: Option<f64>, baro: Option<f64>) -> Value {
    json!([
        icao24, "TEST123 ", "Germany", 1700000000, 1700000005, lon, lat, baro, false, 210.5,
        90.0, 0.0, null, baro.map(|b| b + 25.0), "1000", false, 0
    ])
}

pub fn raw_state(
    icao24: &str,
    lat: Option<f64>,
    lon: Option<f64>,
    baro: Option<f64>,
) -> RawFlightState {
    RawFlightState {
        icao24: Some(icao24.to_string()),
        callsign: Some(format!("{}  ", icao24.to_uppercase())),
        origin_country: Some("Germany".to_string()),
        time_position: Some(1_700_000_000.0),
        last_contact: Some(1_700_000_005.0),
        longitude: lon,
        latitude: lat,
        baro_altitude: baro,
        on_ground: Some(false),
        velocity: Some(210.5),
        ..Default::default()
    }
}

pub fn flight_state(icao24: &str, lat: f64, lon: f64) -> FlightState {
    FlightState {
        icao24: Some(icao24.to_string()),
        callsign: Some("DLH4AB".to_string()),
        origin_country: Some("Germany".to_string()),
        time_position: Utc.timestamp_opt(1_700_000_000, 0).single(),
        last_contact: Utc.timestamp_opt(1_700_000_005, 0).single(),
        longitude: Some(lon),
        latitude: Some(lat),
        baro_altitude: Some(1000.0),
        on_ground: Some(false),
        velocity: Some(210.5),
        true_track: Some(90.0),
        vertical_rate: None,
        sensors: None,
        geo_altitude: None,
        squawk: Some("1000".to_string()),
        spi: Some(false),
        position_source: Some(0),
        altitude_feet: 3281.0,
        processed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}

/// Three rows, one of them without coordinates
pub fn sample_raw_batch() -> Vec<RawFlightState> {
    vec![
        raw_state("3c6444", Some(50.03), Some(8.57), Some(1200.0)),
        raw_state("4b1814", None, None, Some(800.0)),
        raw_state("a0b1c2", Some(47.46), Some(8.55), Some(300.0)),
    ]
}

enum SourceBehavior {
    Batch(Vec<RawFlightState>),
    Unavailable,
    Panic,
}

/// Scripted source that counts its calls
pub struct FakeSource {
    behavior: SourceBehavior,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn returning(batch: Vec<RawFlightState>) -> Self {
        Self {
            behavior: SourceBehavior::Batch(batch),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every call with an HTTP 503
    pub fn unavailable() -> Self {
        Self {
            behavior: SourceBehavior::Unavailable,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn panicking() -> Self {
        Self {
            behavior: SourceBehavior::Panic,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlightSource for FakeSource {
    async fn extract(&self) -> Result<Vec<RawFlightState>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            SourceBehavior::Batch(batch) => Ok(batch.clone()),
            SourceBehavior::Unavailable => Err(ExtractError::HttpStatus {
                url: "http://fake/api/states/all".to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            }),
            SourceBehavior::Panic => panic!("source exploded"),
        }
    }
}

/// SQLite store that records how often it was asked to load
pub struct CountingStore {
    inner: SqliteStore,
    loads: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlightStore for CountingStore {
    async fn load(&self, batch: &[FlightState], table: &str, mode: WriteMode) -> bool {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(batch, table, mode).await
    }

    async fn get_stats(&self, table: &str) -> Option<StoreStats> {
        self.inner.get_stats(table).await
    }
}

/// Exporter that remembers batch sizes and answers with a fixed result
pub struct RecordingExporter {
    name: String,
    succeed: bool,
    batches: Mutex<Vec<usize>>,
}

impl RecordingExporter {
    pub fn new(name: &str, succeed: bool) -> Self {
        Self {
            name: name.to_string(),
            succeed,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlightExporter for RecordingExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn export(&self, batch: &[FlightState]) -> bool {
        self.batches.lock().unwrap().push(batch.len());
        self.succeed
    }
}
