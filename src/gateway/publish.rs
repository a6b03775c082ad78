//! Pub/sub side of the gateway. All polling tasks share one client; the
//! broker connection is driven by a background event-loop task.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish failed: {0}")]
    Client(String),
}

/// Seam between the polling tasks and the broker; tests substitute a
/// recording implementation.
#[async_trait]
pub trait ReadingPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Connects to `host:port`. The first event-loop poll performs the TCP
    /// connect; an unreachable broker fails here.
    pub async fn connect(broker: &str) -> Result<Self> {
        let (host, port) = split_broker(broker)?;
        let client_id = format!("collection-gw-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let event = eventloop
            .poll()
            .await
            .with_context(|| format!("Failed to connect to MQTT broker {broker}"))?;
        debug!(?event, "MQTT broker connected");

        tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    warn!(error = %e, "MQTT event loop error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });

        Ok(Self { client })
    }
}

#[async_trait]
impl ReadingPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| PublishError::Client(e.to_string()))
    }
}

fn split_broker(broker: &str) -> Result<(String, u16)> {
    let (host, port) = broker
        .rsplit_once(':')
        .with_context(|| format!("Broker address {broker} must be host:port"))?;
    anyhow::ensure!(!host.is_empty(), "Broker host must not be empty");
    let port: u16 = port
        .parse()
        .with_context(|| format!("Invalid broker port in {broker}"))?;
    Ok((host.to_string(), port))
}
