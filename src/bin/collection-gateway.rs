use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use iot_sensor_sim::gateway::{self, csv_sink, GatewayConfig};
use iot_sensor_sim::gateway::publish::{MqttPublisher, ReadingPublisher};
use iot_sensor_sim::telemetry;

/// Periodic CoAP-to-MQTT bridge with a durable CSV log.
#[derive(Parser)]
#[command(name = "collection-gateway")]
#[command(about = "Poll a fleet of CoAP devices, publish readings, log to CSV")]
struct Args {
    /// Interval between requests in milliseconds
    #[arg(short = 'i', long = "interval")]
    interval_ms: u64,

    /// Path to the JSON file with device URIs
    #[arg(short = 'd', long = "devices")]
    devices: std::path::PathBuf,

    /// MQTT broker address
    #[arg(short = 'b', long = "broker", default_value = "localhost:1883")]
    broker: String,

    /// MQTT topic to publish readings to
    #[arg(short = 't', long = "topic")]
    topic: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let args = Args::parse();
    anyhow::ensure!(args.interval_ms > 0, "Polling interval must be positive");

    let devices = gateway::load_devices(&args.devices)?;
    let publisher: Arc<dyn ReadingPublisher> = Arc::new(MqttPublisher::connect(&args.broker).await?);
    let csv_path = csv_sink::csv_log_path();

    gateway::run(
        GatewayConfig {
            interval: Duration::from_millis(args.interval_ms),
            devices,
            topic: args.topic,
        },
        publisher,
        &csv_path,
        telemetry::shutdown_signal("collection-gateway"),
    )
    .await
}
