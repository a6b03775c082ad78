use anyhow::Result;
use clap::Parser;
use tracing::info;

use iot_sensor_sim::coap::CoapServer;
use iot_sensor_sim::config::DeviceConfig;
use iot_sensor_sim::device::DeviceSimulator;
use iot_sensor_sim::telemetry;

/// CoAP device simulator serving synthetic sensor telemetry shaped by a
/// live behavioral profile.
#[derive(Parser)]
#[command(name = "device-sim")]
#[command(about = "Simulate one battery-powered IoT sensor device over CoAP")]
struct Args {
    /// Device configuration JSON file
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = DeviceConfig::from_file(&args.config)?;
    let _log_guard = telemetry::init_tracing_with_device_log(&config.uuid)?;

    info!(config = %args.config.display(), "loaded device config");
    log_banner(&config);

    let device = DeviceSimulator::new(config);
    let server = CoapServer::bind(device).await?;
    info!(addr = %server.local_addr()?, "CoAP simulator running");

    server.run(telemetry::shutdown_signal("device-sim")).await?;
    info!("device simulator shut down");
    Ok(())
}

fn log_banner(config: &DeviceConfig) {
    info!(uuid = %config.uuid, "device identity");
    info!(
        host = %config.server_host,
        port = config.server_port,
        path = %config.resource_path_string(),
        "resource binding"
    );
    info!(
        latitude = config.coordinate.latitude,
        longitude = config.coordinate.longitude,
        "coordinate"
    );
    info!(
        initial_charge = config.battery_charge,
        transmit_discharge = config.battery_transmit_discharge,
        idle_discharge = config.battery_idle_discharge,
        "battery"
    );
    info!(drop_percentage = config.drop_percentage, "drop simulation");
    for profile in &config.delay_profiles {
        info!(
            probability = profile.probability,
            min_s = profile.min,
            max_s = profile.max,
            "delay profile"
        );
    }
}
