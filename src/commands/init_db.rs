use anyhow::{Context, Result};
use tracing::info;

use flight_etl::instance_lock::InstanceLock;
use flight_etl::{Config, SqliteStore};

pub async fn handle_init_db(config: &Config) -> Result<()> {
    let _instance_lock = InstanceLock::for_store_in_runtime_dir(&config.database_path)?;

    let store = SqliteStore::new(&config.database_path);
    let table = config.table.clone();
    tokio::task::spawn_blocking(move || store.ensure_table(&table))
        .await
        .context("Table creation task failed")?
        .with_context(|| format!("Failed to initialise {}", config.database_path.display()))?;

    info!(
        "Table {} ready in {}",
        config.table,
        config.database_path.display()
    );
    Ok(())
}
