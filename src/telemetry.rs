use anyhow::{Context, Result};
use std::path::Path;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,rumqttc=warn".into())
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Tracing setup for the device simulator: console output plus a per-device
/// log file `logs/dev-<uuid>.log`.
///
/// The returned guard must be held for the process lifetime; dropping it
/// stops the background log writer.
pub fn init_tracing_with_device_log(uuid: &str) -> Result<WorkerGuard> {
    let logs_dir = Path::new("logs");
    std::fs::create_dir_all(logs_dir).context("Failed to create logs directory")?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(format!("dev-{uuid}.log")))
        .context("Failed to open device log file")?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Ok(guard)
}

/// Resolves once the process is asked to stop. `component` names the
/// binary in the shutdown log line.
///
/// A signal handler that cannot be installed is logged and treated as a
/// signal that never fires; the other one still works.
pub async fn shutdown_signal(component: &'static str) {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!(component, signal = "SIGINT", "shutdown requested"),
        _ = terminate => info!(component, signal = "SIGTERM", "shutdown requested"),
    }
}
