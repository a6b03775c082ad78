use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use iot_sensor_sim::coap::CoapClient;
use iot_sensor_sim::device::event::EventPatch;
use iot_sensor_sim::telemetry;

/// One-shot diagnostic client for simulated devices.
#[derive(Parser)]
#[command(name = "device-probe")]
#[command(about = "Send a single GET or event POST to a device endpoint")]
struct Args {
    /// Device URI, e.g. coap://127.0.0.1:5683/device/data
    uri: String,

    /// Event JSON file to POST; without it the probe GETs telemetry
    #[arg(short = 'e', long = "event")]
    event: Option<std::path::PathBuf>,

    /// Response timeout in seconds
    #[arg(short = 't', long = "timeout", default_value_t = 5.0)]
    timeout_s: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let args = Args::parse();
    let deadline = Duration::from_secs_f64(args.timeout_s.max(0.1));

    let mut client = CoapClient::connect(&args.uri).await?;
    let payload = match &args.event {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read event file {}", path.display()))?;
            let patch: EventPatch = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse event file {}", path.display()))?;
            patch.validate()?;
            client.post(serde_json::to_vec(&patch)?, deadline).await?
        }
        None => client.get(deadline).await?,
    };

    match serde_json::from_slice::<serde_json::Value>(&payload) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", String::from_utf8_lossy(&payload)),
    }
    Ok(())
}
