//! The event coordinator: a time-ordered schedule dispatcher that POSTs
//! event patches to device endpoints at wall-clock offsets.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};
use url::Url;

use crate::coap::{CoapClient, CoapError};
use crate::device::event::EventPatch;

/// Hard ceiling on each dispatched POST, independent of any transport-level
/// retransmission.
const POST_TIMEOUT: Duration = Duration::from_secs(5);

/// One schedule entry: an event patch POSTed to a device at an offset from
/// coordinator start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Dispatch offset in milliseconds.
    pub time_ms: u64,
    /// Target device URI, e.g. `coap://host:5683/device/data`.
    pub device: String,
    pub event: EventPatch,
}

pub struct EventCoordinator {
    schedule: Vec<DeviceEvent>,
}

impl EventCoordinator {
    /// Takes ownership of a schedule and sorts it by dispatch offset.
    pub fn new(mut schedule: Vec<DeviceEvent>) -> Self {
        schedule.sort_by_key(|entry| entry.time_ms);
        Self { schedule }
    }

    /// Loads and validates a schedule file. One invalid entry aborts the
    /// run before anything is dispatched.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule {}", path.display()))?;
        let schedule: Vec<DeviceEvent> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse schedule {}", path.display()))?;

        for (index, entry) in schedule.iter().enumerate() {
            let uri = Url::parse(&entry.device)
                .with_context(|| format!("Schedule entry {index} has an invalid device URI"))?;
            if uri.scheme() != "coap" {
                anyhow::bail!("Schedule entry {index} must use a coap:// URI");
            }
            entry
                .event
                .validate()
                .with_context(|| format!("Schedule entry {index} has an invalid event"))?;
        }
        Ok(Self::new(schedule))
    }

    pub fn schedule(&self) -> &[DeviceEvent] {
        &self.schedule
    }

    /// Dispatches every entry at its offset and waits for all of them.
    ///
    /// Entries are scheduled in sorted order but run concurrently; a
    /// per-target timeout or transport error is logged and swallowed.
    pub async fn run(&self) {
        let started = Instant::now();
        info!(entries = self.schedule.len(), "dispatching event schedule");

        let tasks: Vec<_> = self
            .schedule
            .iter()
            .cloned()
            .map(|entry| {
                tokio::spawn(async move {
                    let offset = Duration::from_millis(entry.time_ms);
                    let elapsed = started.elapsed();
                    if offset > elapsed {
                        sleep(offset - elapsed).await;
                    }
                    dispatch(entry).await;
                })
            })
            .collect();

        join_all(tasks).await;
        info!("event schedule complete");
    }
}

async fn dispatch(entry: DeviceEvent) {
    let payload = match serde_json::to_vec(&entry.event) {
        Ok(payload) => payload,
        Err(e) => {
            error!(device = %entry.device, error = %e, "failed to serialize event");
            return;
        }
    };

    let mut client = match CoapClient::connect(&entry.device).await {
        Ok(client) => client,
        Err(e) => {
            warn!(device = %entry.device, error = %e, "failed to reach device");
            return;
        }
    };

    match client.post(payload, POST_TIMEOUT).await {
        Ok(_) => info!(device = %entry.device, time_ms = entry.time_ms, "event dispatched"),
        Err(CoapError::Timeout) => {
            warn!(device = %entry.device, time_ms = entry.time_ms, "timeout sending event")
        }
        Err(e) => warn!(device = %entry.device, error = %e, "failed to send event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn entry(time_ms: u64) -> DeviceEvent {
        DeviceEvent {
            time_ms,
            device: "coap://127.0.0.1:5683/device/data".to_string(),
            event: EventPatch::default(),
        }
    }

    #[test]
    fn schedule_is_sorted_by_offset() {
        let coordinator = EventCoordinator::new(vec![entry(500), entry(100), entry(300)]);
        let offsets: Vec<u64> = coordinator.schedule().iter().map(|e| e.time_ms).collect();
        assert_eq!(offsets, vec![100, 300, 500]);
    }

    #[test]
    fn load_rejects_invalid_uri() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"time_ms": 100, "device": "not a uri", "event": {{"event_name": "X"}}}}]"#
        )
        .unwrap();
        assert!(EventCoordinator::from_file(file.path()).is_err());
    }

    #[test]
    fn load_rejects_invalid_event_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"time_ms": 100, "device": "coap://127.0.0.1/device/data",
                 "event": {{"drop_percentage": 250.0}}}}]"#
        )
        .unwrap();
        assert!(EventCoordinator::from_file(file.path()).is_err());
    }

    #[test]
    fn load_accepts_minimal_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"time_ms": 0, "device": "coap://127.0.0.1/device/data",
                 "event": {{"event_name": "Quake", "event_type": "transient"}}}}]"#
        )
        .unwrap();
        let coordinator = EventCoordinator::from_file(file.path()).unwrap();
        assert_eq!(coordinator.schedule().len(), 1);
        assert_eq!(coordinator.schedule()[0].event.event_name.as_deref(), Some("Quake"));
    }
}
