use tracing::{error, info, warn};

use crate::flight_state::FlightState;

/// Columns every batch must carry before it is persisted
pub const REQUIRED_COLUMNS: [&str; 4] = ["icao24", "latitude", "longitude", "baro_altitude"];

/// Highest tolerated share of nulls in a required column
pub const MAX_NULL_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataQualityError {
    #[error("batch is empty")]
    EmptyBatch,

    #[error("required column `{0}` is missing")]
    MissingColumn(String),

    #[error("column `{column}` is {percent:.1}% null")]
    TooManyNulls { column: String, percent: f64 },

    #[error("every row is missing baro_altitude")]
    NoBaroAltitude,
}

/// Pre-load quality gate
#[derive(Debug, Clone)]
pub struct Validator {
    required_columns: Vec<String>,
    max_null_fraction: f64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(REQUIRED_COLUMNS, MAX_NULL_FRACTION)
    }
}

impl Validator {
    pub fn new<I, S>(required_columns: I, max_null_fraction: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_columns: required_columns.into_iter().map(Into::into).collect(),
            max_null_fraction,
        }
    }

    pub fn required_columns(&self) -> &[String] {
        &self.required_columns
    }

    /// Check the batch, reporting the first problem found
    pub fn check(&self, batch: &[FlightState]) -> Result<(), DataQualityError> {
        let Some(first) = batch.first() else {
            return Err(DataQualityError::EmptyBatch);
        };

        // All columns must exist before any null ratio is computed
        for column in &self.required_columns {
            if first.is_null(column).is_none() {
                return Err(DataQualityError::MissingColumn(column.clone()));
            }
        }

        for column in &self.required_columns {
            let nulls = batch
                .iter()
                .filter(|row| row.is_null(column).unwrap_or(true))
                .count();
            let fraction = nulls as f64 / batch.len() as f64;
            if fraction > self.max_null_fraction {
                return Err(DataQualityError::TooManyNulls {
                    column: column.clone(),
                    percent: fraction * 100.0,
                });
            }
        }

        Ok(())
    }

    /// [`Validator::check`] as a logged predicate
    pub fn validate(&self, batch: &[FlightState]) -> bool {
        match self.check(batch) {
            Ok(()) => {
                info!("Data validation passed ({} rows)", batch.len());
                true
            }
            Err(DataQualityError::EmptyBatch) => {
                warn!("Empty batch - validation failed");
                false
            }
            Err(e) => {
                error!("Data validation failed: {}", e);
                false
            }
        }
    }
}

/// Validate with the default required columns and null threshold
pub fn validate_data(batch: &[FlightState]) -> bool {
    Validator::default().validate(batch)
}
