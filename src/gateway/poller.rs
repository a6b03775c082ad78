//! Per-URI polling task. Each poller owns one device endpoint, GETs it at a
//! fixed cadence and feeds the CSV sink and the publisher.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::csv_sink::{CsvRow, CsvSink};
use super::publish::ReadingPublisher;
use crate::coap::{CoapClient, CoapError};
use crate::domain::SensorReading;

pub struct PollerConfig {
    pub uri: String,
    pub topic: String,
    pub interval: Duration,
}

/// Runs until cancelled or until the CSV writer goes away.
///
/// The loop never "catches up": when a poll overruns the interval the next
/// one starts immediately, missed ticks are simply gone.
pub async fn poll_device(
    config: PollerConfig,
    sink: CsvSink,
    publisher: Arc<dyn ReadingPublisher>,
    token: CancellationToken,
) {
    // Desynchronize fleet-wide request bursts.
    let jitter = initial_jitter(config.interval);
    debug!(uri = %config.uri, jitter_s = jitter.as_secs_f64(), "poller starting");
    tokio::select! {
        _ = token.cancelled() => return,
        _ = sleep(jitter) => {}
    }

    let request_timeout = request_timeout(config.interval);
    let mut last_reply: Option<SensorReading> = None;
    let mut message_id: u64 = 0;

    loop {
        let sent_time = now_nanos();
        let poll_started = Instant::now();

        match fetch(&config.uri, request_timeout).await {
            Ok(reading) => {
                message_id += 1;
                let row = success_row(&config.uri, &reading, message_id, sent_time);
                if sink.append(row).await.is_err() {
                    break;
                }
                spawn_publish(&config, publisher.clone(), &reading);
                last_reply = Some(reading);
            }
            Err(e) => {
                warn!(
                    uri = %config.uri,
                    error = %e,
                    "ERROR: timeout or empty payload. Battery and temperature set to 0"
                );
                if let Some(prev) = &last_reply {
                    message_id += 1;
                    let row = error_row(&config.uri, prev, message_id, sent_time);
                    if sink.append(row).await.is_err() {
                        break;
                    }
                }
                // no prior reply: nothing to derive a row from, skip the tick
            }
        }

        let elapsed = poll_started.elapsed();
        if elapsed < config.interval {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(config.interval - elapsed) => {}
            }
        } else if token.is_cancelled() {
            break;
        }
    }
    debug!(uri = %config.uri, "poller stopped");
}

/// Per-request timeout: most of the interval, never below half a second.
fn request_timeout(interval: Duration) -> Duration {
    Duration::from_secs_f64((interval.as_secs_f64() * 0.9).max(0.5))
}

fn initial_jitter(interval: Duration) -> Duration {
    let upper = interval.as_secs_f64();
    if upper <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..upper))
}

async fn fetch(uri: &str, deadline: Duration) -> Result<SensorReading, CoapError> {
    let mut client = CoapClient::connect(uri).await?;
    let payload = client.get(deadline).await?;
    serde_json::from_slice(&payload).map_err(|e| CoapError::Codec(e.to_string()))
}

fn spawn_publish(config: &PollerConfig, publisher: Arc<dyn ReadingPublisher>, reading: &SensorReading) {
    let payload = match serde_json::to_vec(reading) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(uri = %config.uri, error = %e, "failed to serialize reading");
            return;
        }
    };
    let topic = config.topic.clone();
    let uri = config.uri.clone();
    tokio::spawn(async move {
        if let Err(e) = publisher.publish(&topic, payload).await {
            warn!(%uri, error = %e, "failed to publish reading");
        }
    });
}

fn success_row(uri: &str, reading: &SensorReading, message_id: u64, sent_time: i64) -> CsvRow {
    CsvRow {
        uuid: reading.uuid.clone(),
        message_id,
        sent_time,
        receipt_time: now_nanos(),
        timestamp: reading.timestamp,
        uri: uri.to_string(),
        longitude: reading.coordinate.longitude,
        latitude: reading.coordinate.latitude,
        temperature: reading.temperature,
        battery: reading.battery,
        error: 0,
    }
}

/// Error rows reuse the identity and position of the last good reply;
/// telemetry fields are zeroed.
fn error_row(uri: &str, prev: &SensorReading, message_id: u64, sent_time: i64) -> CsvRow {
    CsvRow {
        uuid: prev.uuid.clone(),
        message_id,
        sent_time,
        receipt_time: now_nanos(),
        timestamp: prev.timestamp,
        uri: uri.to_string(),
        longitude: prev.coordinate.longitude,
        latitude: prev.coordinate.latitude,
        temperature: 0.0,
        battery: 0.0,
        error: 1,
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
