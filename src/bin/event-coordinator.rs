use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use iot_sensor_sim::coordinator::EventCoordinator;
use iot_sensor_sim::telemetry;

/// Dispatches a time-stamped schedule of event POSTs to device endpoints.
#[derive(Parser)]
#[command(name = "event-coordinator")]
#[command(about = "Fire scheduled behavioral events at simulated devices")]
struct Args {
    /// Schedule JSON file: an array of {time_ms, device, event} entries
    schedule: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let args = Args::parse();

    let coordinator = EventCoordinator::from_file(&args.schedule)?;
    info!(schedule = %args.schedule.display(), "schedule loaded");

    tokio::select! {
        _ = coordinator.run() => {}
        _ = telemetry::shutdown_signal("event-coordinator") => {
            warn!("interrupted before schedule completion");
        }
    }
    Ok(())
}
