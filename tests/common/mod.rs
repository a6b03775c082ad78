#![allow(dead_code)]
use std::net::SocketAddr;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use iot_sensor_sim::coap::CoapServer;
use iot_sensor_sim::config::DeviceConfig;
use iot_sensor_sim::device::DeviceSimulator;

/// A well-behaved test device: no drops, no delays, no idle drain.
pub fn device_config(uuid: &str) -> DeviceConfig {
    serde_json::from_value(serde_json::json!({
        "uuid": uuid,
        "temperature_range": [20.0, 22.0],
        "battery_charge": 1000.0,
        "battery_transmit_discharge": 1.0,
        "battery_idle_discharge": 0.0,
        "drop_percentage": 0.0,
        "delay_profiles": [{"probability": 100.0, "min": 0.0, "max": 0.0}],
        "coordinate": {"latitude": 59.3293, "longitude": 18.0686},
        "server_host": "127.0.0.1",
        "server_port": 0
    }))
    .unwrap()
}

pub struct RunningDevice {
    pub device: DeviceSimulator,
    pub addr: SocketAddr,
    pub uri: String,
    pub stop: CancellationToken,
    pub task: JoinHandle<()>,
}

impl RunningDevice {
    pub async fn shutdown(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Binds a device's CoAP server on an ephemeral localhost port and serves it
/// until `stop` is cancelled.
pub async fn spawn_device(config: DeviceConfig) -> RunningDevice {
    let path = config.resource_path_string();
    let device = DeviceSimulator::new(config);
    let server = CoapServer::bind(device.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let stop = CancellationToken::new();
    let shutdown = stop.clone();
    let task = tokio::spawn(async move {
        server.run(async move { shutdown.cancelled().await }).await.ok();
    });
    RunningDevice {
        device,
        addr,
        uri: format!("coap://{addr}/{path}"),
        stop,
        task,
    }
}
