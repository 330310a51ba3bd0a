//! SQLite persistence for transformed batches.
//!
//! A connection is opened for each load or stats call and dropped when the call
//! returns; nothing is pooled across iterations.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Double, Nullable, Text};
use diesel::sqlite::{Sqlite, SqliteConnection};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use crate::flight_state::{FlightState, format_timestamp};

/// Default destination table
pub const DEFAULT_TABLE: &str = "flights";

/// Rows per INSERT statement (19 binds each keeps us under SQLite's classic 999 limit)
const INSERT_CHUNK_ROWS: usize = 50;

/// What to do when the destination table already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Append,
    Replace,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown write mode `{0}` (expected append, replace or fail)")]
pub struct ParseWriteModeError(String);

impl FromStr for WriteMode {
    type Err = ParseWriteModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "replace" => Ok(WriteMode::Replace),
            "fail" => Ok(WriteMode::Fail),
            _ => Err(ParseWriteModeError(s.to_string())),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => write!(f, "append"),
            WriteMode::Replace => write!(f, "replace"),
            WriteMode::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store {0} does not exist")]
    Missing(PathBuf),

    #[error("invalid table name `{0}`")]
    InvalidTableName(String),

    #[error("table `{0}` already exists")]
    TableExists(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not open store: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("sqlite error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Row count and DDL of a stored table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub table: String,
    pub row_count: i64,
    pub schema: Option<String>,
}

/// Durable destination for validated batches.
///
/// Both operations swallow their errors: failures are logged and reported as
/// `false` / `None`.
#[async_trait]
pub trait FlightStore: Send + Sync {
    async fn load(&self, batch: &[FlightState], table: &str, mode: WriteMode) -> bool;

    async fn get_stats(&self, table: &str) -> Option<StoreStats>;
}

#[derive(QueryableByName)]
struct RowCount {
    #[diesel(sql_type = BigInt)]
    row_count: i64,
}

#[derive(QueryableByName)]
struct TableSql {
    #[diesel(sql_type = Nullable<Text>)]
    sql: Option<String>,
}

/// SQLite file store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<SqliteConnection, StoreError> {
        Ok(SqliteConnection::establish(&self.path.to_string_lossy())?)
    }

    /// Create the table if it does not exist yet
    pub fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        validate_table_name(table)?;
        create_parent_dir(&self.path)?;
        let mut conn = self.connect()?;
        diesel::sql_query(create_table_sql(table, true)).execute(&mut conn)?;
        Ok(())
    }

    /// Write `batch` into `table` according to `mode`, in a single transaction.
    ///
    /// Returns the number of rows inserted.
    pub fn write_batch(
        &self,
        batch: &[FlightState],
        table: &str,
        mode: WriteMode,
    ) -> Result<usize, StoreError> {
        validate_table_name(table)?;
        create_parent_dir(&self.path)?;

        let mut conn = self.connect()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            match mode {
                WriteMode::Append => {
                    diesel::sql_query(create_table_sql(table, true)).execute(conn)?;
                }
                WriteMode::Replace => {
                    diesel::sql_query(format!("DROP TABLE IF EXISTS \"{}\"", table))
                        .execute(conn)?;
                    diesel::sql_query(create_table_sql(table, false)).execute(conn)?;
                }
                WriteMode::Fail => {
                    if table_exists(conn, table)? {
                        return Err(StoreError::TableExists(table.to_string()));
                    }
                    diesel::sql_query(create_table_sql(table, false)).execute(conn)?;
                }
            }

            let mut inserted = 0;
            for chunk in batch.chunks(INSERT_CHUNK_ROWS) {
                inserted += insert_chunk(conn, table, chunk)?;
            }
            Ok(inserted)
        })
    }

    /// Row count and schema of `table`. A missing store file is an error and is
    /// not created as a side effect.
    pub fn read_stats(&self, table: &str) -> Result<StoreStats, StoreError> {
        validate_table_name(table)?;
        if !self.path.exists() {
            return Err(StoreError::Missing(self.path.clone()));
        }

        let mut conn = self.connect()?;
        let count: RowCount =
            diesel::sql_query(format!("SELECT COUNT(*) AS row_count FROM \"{}\"", table))
                .get_result(&mut conn)?;

        let schema: Option<TableSql> = diesel::sql_query(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind::<Text, _>(table)
        .get_result(&mut conn)
        .optional()?;

        Ok(StoreStats {
            table: table.to_string(),
            row_count: count.row_count,
            schema: schema.and_then(|s| s.sql),
        })
    }

    /// Open the store and count its schema objects
    pub fn probe(&self) -> Result<i64, StoreError> {
        let mut conn = self.connect()?;
        let count: RowCount =
            diesel::sql_query("SELECT COUNT(*) AS row_count FROM sqlite_master")
                .get_result(&mut conn)?;
        Ok(count.row_count)
    }
}

#[async_trait]
impl FlightStore for SqliteStore {
    async fn load(&self, batch: &[FlightState], table: &str, mode: WriteMode) -> bool {
        if batch.is_empty() {
            warn!("No data to load into {}", self.path.display());
            return false;
        }

        info!(
            "Loading {} rows into {} (table {}, {} mode)",
            batch.len(),
            self.path.display(),
            table,
            mode
        );

        let store = self.clone();
        let rows = batch.to_vec();
        let table_name = table.to_string();
        let result =
            tokio::task::spawn_blocking(move || store.write_batch(&rows, &table_name, mode))
                .await
                .map_err(StoreError::from)
                .and_then(|inner| inner);

        match result {
            Ok(inserted) => {
                info!("Loaded {} rows into {} ({} mode)", inserted, table, mode);
                true
            }
            Err(e) => {
                error!("Failed to load batch into {}: {}", self.path.display(), e);
                false
            }
        }
    }

    async fn get_stats(&self, table: &str) -> Option<StoreStats> {
        let store = self.clone();
        let table_name = table.to_string();
        let result = tokio::task::spawn_blocking(move || store.read_stats(&table_name))
            .await
            .map_err(StoreError::from)
            .and_then(|inner| inner);

        match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Failed to read store statistics for {}: {}", table, e);
                None
            }
        }
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are accepted
pub fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(table.to_string()))
    }
}

fn create_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn create_table_sql(table: &str, if_not_exists: bool) -> String {
    format!(
        "CREATE TABLE {}\"{}\" (
            icao24 TEXT,
            callsign TEXT,
            origin_country TEXT,
            time_position TEXT,
            last_contact TEXT,
            longitude REAL,
            latitude REAL,
            baro_altitude REAL,
            on_ground INTEGER,
            velocity REAL,
            true_track REAL,
            vertical_rate REAL,
            sensors TEXT,
            geo_altitude REAL,
            squawk TEXT,
            spi INTEGER,
            position_source INTEGER,
            altitude_feet REAL,
            processed_at TEXT
        )",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        table
    )
}

fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool, StoreError> {
    let count: RowCount = diesel::sql_query(
        "SELECT COUNT(*) AS row_count FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind::<Text, _>(table)
    .get_result(conn)?;
    Ok(count.row_count > 0)
}

fn insert_chunk(
    conn: &mut SqliteConnection,
    table: &str,
    chunk: &[FlightState],
) -> Result<usize, StoreError> {
    let placeholders = format!("({})", vec!["?"; FlightState::COLUMNS.len()].join(", "));
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES {}",
        table,
        FlightState::COLUMNS.join(", "),
        vec![placeholders; chunk.len()].join(", ")
    );

    let mut query = diesel::sql_query(sql).into_boxed::<Sqlite>();
    for state in chunk {
        query = query
            .bind::<Nullable<Text>, _>(state.icao24.clone())
            .bind::<Nullable<Text>, _>(state.callsign.clone())
            .bind::<Nullable<Text>, _>(state.origin_country.clone())
            .bind::<Nullable<Text>, _>(state.time_position.map(format_timestamp))
            .bind::<Nullable<Text>, _>(state.last_contact.map(format_timestamp))
            .bind::<Nullable<Double>, _>(state.longitude)
            .bind::<Nullable<Double>, _>(state.latitude)
            .bind::<Nullable<Double>, _>(state.baro_altitude)
            .bind::<Nullable<Bool>, _>(state.on_ground)
            .bind::<Nullable<Double>, _>(state.velocity)
            .bind::<Nullable<Double>, _>(state.true_track)
            .bind::<Nullable<Double>, _>(state.vertical_rate)
            .bind::<Nullable<Text>, _>(state.sensors_json())
            .bind::<Nullable<Double>, _>(state.geo_altitude)
            .bind::<Nullable<Text>, _>(state.squawk.clone())
            .bind::<Nullable<Bool>, _>(state.spi)
            .bind::<Nullable<BigInt>, _>(state.position_source)
            .bind::<Double, _>(state.altitude_feet)
            .bind::<Text, _>(format_timestamp(state.processed_at));
    }

    let inserted = query.execute(conn)?;
    debug!("Inserted chunk of {} rows into {}", inserted, table);
    Ok(inserted)
}
