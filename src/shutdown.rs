use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status used when a second signal forces the process down
pub const FORCED_EXIT_CODE: i32 = 130;

/// Route termination signals into `stop`.
///
/// The first SIGINT, SIGTERM or SIGHUP cancels the token so the current iteration can
/// finish. A second one exits immediately.
pub fn install_signal_handlers(stop: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                    _ = sighup.recv() => "SIGHUP",
                };
                on_signal(name, &stop);
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                on_signal("Ctrl+C", &stop);
            }
        });
    }

    Ok(())
}

fn on_signal(name: &str, stop: &CancellationToken) {
    if stop.is_cancelled() {
        warn!("Received {} again, exiting immediately", name);
        std::process::exit(FORCED_EXIT_CODE);
    }

    info!(
        "Received {}, finishing the current iteration before shutting down (send again to force)",
        name
    );
    metrics::gauge!("pipeline_stop_requested").set(1.0);
    stop.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_cancels_token() {
        let stop = CancellationToken::new();
        on_signal("SIGTERM", &stop);
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_install_does_not_cancel() {
        let stop = CancellationToken::new();
        install_signal_handlers(stop.clone()).unwrap();
        assert!(!stop.is_cancelled());
    }
}
