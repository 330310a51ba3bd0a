use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::error;

use flight_etl::{Config, logging};

mod commands;

use commands::{handle_health, handle_init_db, handle_run, handle_stats};

#[derive(Parser)]
#[command(name = "flight-etl")]
#[command(version = flight_etl::version())]
#[command(about = "Refresh a SQLite table with live OpenSky aircraft states")]
struct Cli {
    /// Run a single iteration and exit
    #[arg(long)]
    once: bool,

    /// Extract, transform and validate, but skip loading and export
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the destination table if it does not exist
    InitDb,
    /// Print row count and schema of the destination table
    Stats,
    /// Probe the API, the store and the credentials file; exit 1 if any check fails
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from the environment too, so fall back to defaults
            let _ = logging::init("info", None, false);
            error!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _sentry = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: Some(flight_etl::version().into()),
                ..Default::default()
            },
        ))
    });

    if let Err(e) = logging::init(
        &config.log_level,
        config.log_file.as_deref(),
        config.sentry_dsn.is_some(),
    ) {
        eprintln!("Failed to initialise logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Commands::InitDb) => handle_init_db(&config).await,
        Some(Commands::Stats) => handle_stats(&config).await,
        Some(Commands::Health) => match handle_health(&config).await {
            Ok(true) => Ok(()),
            Ok(false) => return ExitCode::FAILURE,
            Err(e) => Err(e),
        },
        None => handle_run(&config, cli.once, cli.dry_run).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
