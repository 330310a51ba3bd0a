use anyhow::{Result, bail};

use flight_etl::{Config, FlightStore, SqliteStore};

pub async fn handle_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::new(&config.database_path);
    let Some(stats) = store.get_stats(&config.table).await else {
        bail!(
            "No statistics available for table {} in {}",
            config.table,
            config.database_path.display()
        );
    };

    println!("Database: {}", config.database_path.display());
    println!("Table:    {}", stats.table);
    println!("Rows:     {}", stats.row_count);
    if let Some(schema) = stats.schema {
        println!("Schema:\n{}", schema);
    }
    Ok(())
}
