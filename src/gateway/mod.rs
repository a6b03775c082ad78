//! The collection gateway: a periodic polling engine bridging a fleet of
//! CoAP devices to a pub/sub topic and a durable CSV log.

pub mod csv_sink;
pub mod poller;
pub mod publish;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use url::Url;

use csv_sink::CsvSink;
use poller::PollerConfig;
use publish::ReadingPublisher;

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: Vec<String>,
}

/// Loads the device URI list `{"devices": [...]}`. An empty or invalid list
/// is fatal.
pub fn load_devices(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read device list {}", path.display()))?;
    let list: DeviceList = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse device list {}", path.display()))?;
    anyhow::ensure!(!list.devices.is_empty(), "Device list is empty");

    for (index, uri) in list.devices.iter().enumerate() {
        let parsed = Url::parse(uri)
            .with_context(|| format!("Device list entry {index} is not a valid URI"))?;
        anyhow::ensure!(
            parsed.scheme() == "coap",
            "Device list entry {index} must use a coap:// URI"
        );
    }
    Ok(list.devices)
}

pub struct GatewayConfig {
    pub interval: Duration,
    pub devices: Vec<String>,
    pub topic: String,
}

/// Runs the gateway until `shutdown` resolves: one poller per device URI,
/// all feeding the shared publisher and the CSV writer.
///
/// On shutdown the pollers are cancelled first; the writer then drains the
/// remaining queue and flushes before this returns.
pub async fn run(
    config: GatewayConfig,
    publisher: Arc<dyn ReadingPublisher>,
    csv_path: &Path,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let capacity = csv_sink::queue_capacity(config.devices.len(), config.interval);
    let (sink, writer) = CsvSink::create(csv_path, capacity)?;
    info!(
        devices = config.devices.len(),
        interval_ms = config.interval.as_millis() as u64,
        log = %csv_path.display(),
        "gateway starting"
    );

    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    for uri in &config.devices {
        tracker.spawn(poller::poll_device(
            PollerConfig {
                uri: uri.clone(),
                topic: config.topic.clone(),
                interval: config.interval,
            },
            sink.clone(),
            publisher.clone(),
            token.child_token(),
        ));
    }
    tracker.close();

    shutdown.await;
    info!("stopping pollers");
    token.cancel();
    tracker.wait().await;

    // Last sink clone gone: the writer drains the queue and flushes.
    drop(sink);
    writer.await.context("CSV writer task failed")?;
    info!("gateway stopped");
    Ok(())
}
