use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::log_format::TargetFirstFormat;

/// Crates whose chatter is capped at `warn` unless `RUST_LOG` says otherwise
const NOISY_TARGETS: [&str; 3] = ["hyper", "reqwest", "h2"];

/// Directive used when `RUST_LOG` is not set
pub fn default_directives(level: &str) -> String {
    let mut directives = level.to_string();
    for target in NOISY_TARGETS {
        directives.push_str(&format!(",{}=warn", target));
    }
    directives
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`. Console output is coloured; `log_file`, when given,
/// receives the same events without colours. With `sentry` set, events are also
/// forwarded to the Sentry client initialised by the caller.
pub fn init(level: &str, log_file: Option<&Path>, sentry: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .with_context(|| format!("Invalid log level `{}`", level))?;

    let console = tracing_subscriber::fmt::layer().event_format(TargetFirstFormat::new(true));

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .event_format(TargetFirstFormat::new(false))
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let sentry_layer = sentry.then(sentry_tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .with(sentry_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
