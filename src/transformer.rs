use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::flight_state::{FlightState, RawFlightState};
use crate::validator::DataQualityError;

/// Meters to feet
pub const FEET_PER_METER: f64 = 3.281;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    DataQuality(#[from] DataQualityError),

    #[error("{field} epoch {value} is outside the representable range")]
    TimestampOutOfRange { field: &'static str, value: f64 },
}

/// Clean and enrich a raw batch.
///
/// Never fails: any error is logged and turned into an empty batch, which the
/// pipeline treats the same as "no usable data".
pub fn transform(raw: Vec<RawFlightState>) -> Vec<FlightState> {
    if raw.is_empty() {
        warn!("Empty raw batch, nothing to transform");
        return Vec::new();
    }

    let input_rows = raw.len();
    let processed_at = Utc::now();

    match transform_at(raw, processed_at) {
        Ok(states) => {
            info!(
                "Transformation complete: {} -> {} rows",
                input_rows,
                states.len()
            );
            states
        }
        Err(e) => {
            error!(
                "Transformation of {} rows failed, discarding batch: {}",
                input_rows, e
            );
            Vec::new()
        }
    }
}

/// Deterministic core of [`transform`]: every row is stamped with `processed_at`.
pub fn transform_at(
    raw: Vec<RawFlightState>,
    processed_at: DateTime<Utc>,
) -> Result<Vec<FlightState>, TransformError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<RawFlightState> = raw.into_iter().filter(|row| !row.is_empty()).collect();
    debug!("{} rows after dropping empty rows", rows.len());

    // A batch without a single altitude points at the feed, not at individual aircraft
    if !rows.is_empty() && rows.iter().all(|row| row.baro_altitude.is_none()) {
        return Err(DataQualityError::NoBaroAltitude.into());
    }

    let converted = rows
        .into_iter()
        .map(|row| convert_row(row, processed_at))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Timestamps converted and altitude in feet computed");

    let before = converted.len();
    let states: Vec<FlightState> = converted
        .into_iter()
        .filter(|state| state.latitude.is_some() && state.longitude.is_some())
        .collect();

    let removed = before - states.len();
    if removed > 0 {
        info!("Dropped {} rows without coordinates", removed);
    }

    Ok(states)
}

fn convert_row(
    row: RawFlightState,
    processed_at: DateTime<Utc>,
) -> Result<FlightState, TransformError> {
    Ok(FlightState {
        icao24: row.icao24.map(|s| s.trim().to_string()),
        callsign: row.callsign.map(|s| s.trim().to_string()),
        origin_country: row.origin_country.map(|s| s.trim().to_string()),
        time_position: epoch_to_utc("time_position", row.time_position)?,
        last_contact: epoch_to_utc("last_contact", row.last_contact)?,
        longitude: row.longitude,
        latitude: row.latitude,
        altitude_feet: row.baro_altitude.unwrap_or(0.0) * FEET_PER_METER,
        baro_altitude: row.baro_altitude,
        on_ground: row.on_ground,
        velocity: row.velocity,
        true_track: row.true_track,
        vertical_rate: row.vertical_rate,
        sensors: row.sensors,
        geo_altitude: row.geo_altitude,
        squawk: row.squawk.map(|s| s.trim().to_string()),
        spi: row.spi,
        position_source: row.position_source,
        processed_at,
    })
}

/// Epoch seconds to UTC, keeping sub-second precision; zero, negative and null all mean
/// "unknown"
fn epoch_to_utc(
    field: &'static str,
    value: Option<f64>,
) -> Result<Option<DateTime<Utc>>, TransformError> {
    match value {
        Some(secs) if secs > 0.0 => {
            let nanos = ((secs.fract() * 1e9).round() as u32).min(999_999_999);
            DateTime::from_timestamp(secs.trunc() as i64, nanos)
                .map(Some)
                .ok_or(TransformError::TimestampOutOfRange { field, value: secs })
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(icao24: &str, lat: Option<f64>, lon: Option<f64>, baro: Option<f64>) -> RawFlightState {
        RawFlightState {
            icao24: Some(icao24.to_string()),
            callsign: Some(" AFR12  ".to_string()),
            origin_country: Some("France".to_string()),
            time_position: Some(1_620_000_000.0),
            last_contact: Some(1_620_000_001.0),
            longitude: lon,
            latitude: lat,
            baro_altitude: baro,
            on_ground: Some(false),
            velocity: Some(200.0),
            ..Default::default()
        }
    }

    fn processed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_input_is_noop() {
        assert!(transform(Vec::new()).is_empty());
        assert_eq!(transform_at(Vec::new(), processed_at()), Ok(Vec::new()));
    }

    #[test]
    fn test_drops_rows_without_coordinates() {
        let batch = vec![
            raw("a", Some(48.0), Some(2.0), Some(1000.0)),
            raw("b", None, None, Some(900.0)),
            raw("c", Some(45.0), Some(4.0), Some(800.0)),
        ];

        let states = transform_at(batch, processed_at()).unwrap();
        assert_eq!(states.len(), 2);
        assert!(
            states
                .iter()
                .all(|s| s.latitude.is_some() && s.longitude.is_some())
        );
    }

    #[test]
    fn test_altitude_feet_conversion() {
        let batch = vec![
            raw("a", Some(48.0), Some(2.0), Some(1000.0)),
            raw("b", Some(48.0), Some(2.0), None),
        ];

        let states = transform_at(batch, processed_at()).unwrap();
        assert!((states[0].altitude_feet - 3281.0).abs() < 1e-9);
        assert_eq!(states[1].altitude_feet, 0.0);
        assert_eq!(states[1].baro_altitude, None);
    }

    #[test]
    fn test_all_baro_altitude_null_rejects_batch() {
        let batch = vec![
            raw("a", Some(48.0), Some(2.0), None),
            raw("b", Some(47.0), Some(3.0), None),
        ];

        assert_eq!(
            transform_at(batch.clone(), processed_at()),
            Err(TransformError::DataQuality(DataQualityError::NoBaroAltitude))
        );
        assert!(transform(batch).is_empty());
    }

    #[test]
    fn test_fully_empty_rows_are_dropped_before_altitude_check() {
        let batch = vec![
            RawFlightState::default(),
            raw("a", Some(48.0), Some(2.0), Some(10.0)),
            RawFlightState::default(),
        ];

        let states = transform_at(batch, processed_at()).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].icao24.as_deref(), Some("a"));
    }

    #[test]
    fn test_timestamps_converted_and_non_positive_nulled() {
        let mut zero = raw("b", Some(1.0), Some(1.0), Some(1.0));
        zero.time_position = Some(0.0);
        zero.last_contact = Some(-5.0);

        let states = transform_at(
            vec![raw("a", Some(1.0), Some(1.0), Some(1.0)), zero],
            processed_at(),
        )
        .unwrap();

        assert_eq!(
            states[0].time_position,
            Some(Utc.timestamp_opt(1_620_000_000, 0).unwrap())
        );
        assert_eq!(states[1].time_position, None);
        assert_eq!(states[1].last_contact, None);
    }

    #[test]
    fn test_sub_second_epochs_keep_their_fraction() {
        let mut row = raw("a", Some(1.0), Some(1.0), Some(1.0));
        row.time_position = Some(0.5);
        row.last_contact = Some(1_620_000_001.25);

        let states = transform_at(vec![row], processed_at()).unwrap();

        assert_eq!(
            states[0].time_position,
            Some(Utc.timestamp_opt(0, 500_000_000).unwrap())
        );
        assert_eq!(
            states[0].last_contact,
            Some(Utc.timestamp_opt(1_620_000_001, 250_000_000).unwrap())
        );
    }

    #[test]
    fn test_processed_at_shared_by_batch_and_callsign_trimmed() {
        let batch = vec![
            raw("a", Some(1.0), Some(1.0), Some(1.0)),
            raw("b", Some(2.0), Some(2.0), Some(2.0)),
        ];

        let states = transform(batch);
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].processed_at, states[1].processed_at);
        assert_eq!(states[0].callsign.as_deref(), Some("AFR12"));
    }

    #[test]
    fn test_unrepresentable_epoch_rejects_batch() {
        let mut row = raw("a", Some(1.0), Some(1.0), Some(1.0));
        row.last_contact = Some(1e300);

        let result = transform_at(vec![row.clone()], processed_at());
        assert!(matches!(
            result,
            Err(TransformError::TimestampOutOfRange {
                field: "last_contact",
                ..
            })
        ));
        assert!(transform(vec![row]).is_empty());
    }
}
