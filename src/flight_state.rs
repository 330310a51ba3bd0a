//! Aircraft state records.
//!
//! OpenSky returns each aircraft as a positional JSON array ("state vector"). That row is
//! parsed into a [`RawFlightState`] by the extractor and turned into a canonical
//! [`FlightState`] by the transformer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Number of positional fields in an OpenSky state vector
pub const STATE_VECTOR_FIELDS: usize = 17;

/// Field names of the state vector, in the order fixed by the OpenSky API
pub const STATE_VECTOR_COLUMNS: [&str; STATE_VECTOR_FIELDS] = [
    "icao24",
    "callsign",
    "origin_country",
    "time_position",
    "last_contact",
    "longitude",
    "latitude",
    "baro_altitude",
    "on_ground",
    "velocity",
    "true_track",
    "vertical_rate",
    "sensors",
    "geo_altitude",
    "squawk",
    "spi",
    "position_source",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateVectorError {
    #[error("state vector has {0} fields, expected 17")]
    TooShort(usize),
    #[error("field `{field}` has unexpected value {value}")]
    UnexpectedType { field: &'static str, value: String },
}

/// One aircraft observation exactly as delivered by the API
///
/// Every field is optional: the upstream feed may send `null` anywhere, including
/// rows where every field is `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFlightState {
    pub icao24: Option<String>,
    pub callsign: Option<String>,
    pub origin_country: Option<String>,
    /// Unix epoch seconds, fractions kept
    pub time_position: Option<f64>,
    /// Unix epoch seconds, fractions kept
    pub last_contact: Option<f64>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    /// Meters
    pub baro_altitude: Option<f64>,
    pub on_ground: Option<bool>,
    /// m/s
    pub velocity: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub sensors: Option<Vec<i64>>,
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    pub spi: Option<bool>,
    pub position_source: Option<i64>,
}

impl RawFlightState {
    /// Parse one positional state vector.
    ///
    /// Trailing entries beyond the 17 documented fields (OpenSky's optional `category`)
    /// are ignored.
    pub fn from_state_vector(row: &[Value]) -> Result<Self, StateVectorError> {
        if row.len() < STATE_VECTOR_FIELDS {
            return Err(StateVectorError::TooShort(row.len()));
        }

        Ok(Self {
            icao24: string_at(row, 0)?,
            callsign: string_at(row, 1)?,
            origin_country: string_at(row, 2)?,
            time_position: epoch_at(row, 3)?,
            last_contact: epoch_at(row, 4)?,
            longitude: float_at(row, 5)?,
            latitude: float_at(row, 6)?,
            baro_altitude: float_at(row, 7)?,
            on_ground: bool_at(row, 8)?,
            velocity: float_at(row, 9)?,
            true_track: float_at(row, 10)?,
            vertical_rate: float_at(row, 11)?,
            sensors: sensors_at(row, 12)?,
            geo_altitude: float_at(row, 13)?,
            squawk: string_at(row, 14)?,
            spi: bool_at(row, 15)?,
            position_source: int_at(row, 16)?,
        })
    }

    /// True when every field is null
    pub fn is_empty(&self) -> bool {
        self.icao24.is_none()
            && self.callsign.is_none()
            && self.origin_country.is_none()
            && self.time_position.is_none()
            && self.last_contact.is_none()
            && self.longitude.is_none()
            && self.latitude.is_none()
            && self.baro_altitude.is_none()
            && self.on_ground.is_none()
            && self.velocity.is_none()
            && self.true_track.is_none()
            && self.vertical_rate.is_none()
            && self.sensors.is_none()
            && self.geo_altitude.is_none()
            && self.squawk.is_none()
            && self.spi.is_none()
            && self.position_source.is_none()
    }
}

fn unexpected(row: &[Value], index: usize) -> StateVectorError {
    StateVectorError::UnexpectedType {
        field: STATE_VECTOR_COLUMNS[index],
        value: row[index].to_string(),
    }
}

fn string_at(row: &[Value], index: usize) -> Result<Option<String>, StateVectorError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(unexpected(row, index)),
    }
}

fn float_at(row: &[Value], index: usize) -> Result<Option<f64>, StateVectorError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| unexpected(row, index)),
        _ => Err(unexpected(row, index)),
    }
}

fn int_at(row: &[Value], index: usize) -> Result<Option<i64>, StateVectorError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| unexpected(row, index)),
        _ => Err(unexpected(row, index)),
    }
}

fn epoch_at(row: &[Value], index: usize) -> Result<Option<f64>, StateVectorError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .filter(|secs| secs.is_finite())
            .map(Some)
            .ok_or_else(|| unexpected(row, index)),
        _ => Err(unexpected(row, index)),
    }
}

fn bool_at(row: &[Value], index: usize) -> Result<Option<bool>, StateVectorError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        _ => Err(unexpected(row, index)),
    }
}

fn sensors_at(row: &[Value], index: usize) -> Result<Option<Vec<i64>>, StateVectorError> {
    match &row[index] {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_i64().ok_or_else(|| unexpected(row, index)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        _ => Err(unexpected(row, index)),
    }
}

/// Canonical, transformed aircraft observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightState {
    pub icao24: Option<String>,
    pub callsign: Option<String>,
    pub origin_country: Option<String>,
    pub time_position: Option<DateTime<Utc>>,
    pub last_contact: Option<DateTime<Utc>>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub baro_altitude: Option<f64>,
    pub on_ground: Option<bool>,
    pub velocity: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub sensors: Option<Vec<i64>>,
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    pub spi: Option<bool>,
    pub position_source: Option<i64>,
    /// `baro_altitude` (null as 0) converted to feet
    pub altitude_feet: f64,
    /// When the batch was transformed; identical for every row of a batch
    pub processed_at: DateTime<Utc>,
}

impl FlightState {
    /// Column names in store/export order
    pub const COLUMNS: [&'static str; 19] = [
        "icao24",
        "callsign",
        "origin_country",
        "time_position",
        "last_contact",
        "longitude",
        "latitude",
        "baro_altitude",
        "on_ground",
        "velocity",
        "true_track",
        "vertical_rate",
        "sensors",
        "geo_altitude",
        "squawk",
        "spi",
        "position_source",
        "altitude_feet",
        "processed_at",
    ];

    /// Whether `column` is null on this record.
    ///
    /// Returns `None` when the column is not part of the schema.
    pub fn is_null(&self, column: &str) -> Option<bool> {
        let null = match column {
            "icao24" => self.icao24.is_none(),
            "callsign" => self.callsign.is_none(),
            "origin_country" => self.origin_country.is_none(),
            "time_position" => self.time_position.is_none(),
            "last_contact" => self.last_contact.is_none(),
            "longitude" => self.longitude.is_none(),
            "latitude" => self.latitude.is_none(),
            "baro_altitude" => self.baro_altitude.is_none(),
            "on_ground" => self.on_ground.is_none(),
            "velocity" => self.velocity.is_none(),
            "true_track" => self.true_track.is_none(),
            "vertical_rate" => self.vertical_rate.is_none(),
            "sensors" => self.sensors.is_none(),
            "geo_altitude" => self.geo_altitude.is_none(),
            "squawk" => self.squawk.is_none(),
            "spi" => self.spi.is_none(),
            "position_source" => self.position_source.is_none(),
            "altitude_feet" | "processed_at" => false,
            _ => return None,
        };
        Some(null)
    }

    /// Render the record as text cells for CSV and spreadsheet output.
    ///
    /// Absent values become empty cells and timestamps are RFC 3339 UTC.
    pub fn to_cells(&self) -> Vec<String> {
        fn text(value: &Option<String>) -> String {
            value.clone().unwrap_or_default()
        }
        fn display<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        vec![
            text(&self.icao24),
            text(&self.callsign),
            text(&self.origin_country),
            self.time_position.map(format_timestamp).unwrap_or_default(),
            self.last_contact.map(format_timestamp).unwrap_or_default(),
            display(&self.longitude),
            display(&self.latitude),
            display(&self.baro_altitude),
            display(&self.on_ground),
            display(&self.velocity),
            display(&self.true_track),
            display(&self.vertical_rate),
            self.sensors_json().unwrap_or_default(),
            display(&self.geo_altitude),
            text(&self.squawk),
            display(&self.spi),
            display(&self.position_source),
            self.altitude_feet.to_string(),
            format_timestamp(self.processed_at),
        ]
    }

    /// Sensor ids as a JSON array string
    pub fn sensors_json(&self) -> Option<String> {
        self.sensors
            .as_ref()
            .and_then(|sensors| serde_json::to_string(sensors).ok())
    }
}

/// Timestamp format used by the store and every exporter
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
