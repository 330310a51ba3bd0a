use anyhow::Result;

use flight_etl::Config;
use flight_etl::health_check::system_health_check;

/// Run every probe and print the report; `Ok(false)` when any check failed
pub async fn handle_health(config: &Config) -> Result<bool> {
    let report = system_health_check(
        &config.api_url,
        &config.database_path,
        config.health_credentials_path(),
    )
    .await;

    for (check, healthy) in &report.checks {
        println!("{:<12} {}", check, if *healthy { "ok" } else { "FAILED" });
    }
    Ok(report.all_healthy())
}
