//! Buffered CSV logging. Polling tasks enqueue rows; a single writer task
//! owns the file handle, flushing periodically and draining on shutdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Flush cadence of the writer task.
const FLUSH_PERIOD: Duration = Duration::from_secs(30);

/// Column order of the gateway log.
const HEADER: [&str; 11] = [
    "uuid",
    "message_id",
    "sent_time",
    "receipt_time",
    "timestamp",
    "uri",
    "longitude",
    "latitude",
    "temperature",
    "battery",
    "error",
];

/// One row of the gateway log. `sent_time` and `receipt_time` are
/// nanoseconds since the UNIX epoch; `error` is 0 or 1.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub uuid: String,
    pub message_id: u64,
    pub sent_time: i64,
    pub receipt_time: i64,
    pub timestamp: f64,
    pub uri: String,
    pub longitude: f64,
    pub latitude: f64,
    pub temperature: f64,
    pub battery: f64,
    pub error: u8,
}

#[derive(Debug, Error)]
#[error("CSV writer stopped")]
pub struct SinkClosed;

/// Cheap-to-clone handle the polling tasks append through.
#[derive(Clone)]
pub struct CsvSink {
    tx: mpsc::Sender<CsvRow>,
}

impl CsvSink {
    /// Opens `path`, writes the header row immediately and spawns the writer
    /// task. Dropping every sink clone lets the writer drain and exit; await
    /// the returned handle to be sure the file is flushed.
    pub fn create(path: &Path, queue_capacity: usize) -> Result<(Self, JoinHandle<()>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_path(path)
            .with_context(|| format!("Failed to create CSV log {}", path.display()))?;
        writer.write_record(HEADER).context("Failed to write CSV header")?;
        writer.flush().context("Failed to flush CSV header")?;

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let task = tokio::spawn(run_writer(writer, rx));
        Ok((Self { tx }, task))
    }

    pub async fn append(&self, row: CsvRow) -> Result<(), SinkClosed> {
        self.tx.send(row).await.map_err(|_| SinkClosed)
    }
}

/// Queue sizing rule: hold at least one flush period's worth of rows for
/// every device.
pub fn queue_capacity(devices: usize, interval: Duration) -> usize {
    let rows_per_flush = (FLUSH_PERIOD.as_secs_f64() / interval.as_secs_f64().max(0.001)).ceil();
    (devices * rows_per_flush as usize).max(64)
}

/// Log file path for a gateway started now: `logs/gw-<YYYYMMDD-HHMMSS>.csv`.
pub fn csv_log_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    Path::new("logs").join(format!("gw-{stamp}.csv"))
}

async fn run_writer(mut writer: csv::Writer<std::fs::File>, mut rx: mpsc::Receiver<CsvRow>) {
    let mut flush = tokio::time::interval(FLUSH_PERIOD);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick resolves immediately
    flush.tick().await;

    loop {
        tokio::select! {
            maybe_row = rx.recv() => match maybe_row {
                Some(row) => {
                    if let Err(e) = write_row(&mut writer, &row) {
                        error!(error = %e, "failed to write CSV row");
                    }
                }
                // all senders gone and the queue fully drained
                None => break,
            },
            _ = flush.tick() => {
                if let Err(e) = writer.flush() {
                    error!(error = %e, "failed to flush CSV log");
                }
            }
        }
    }

    if let Err(e) = writer.flush() {
        error!(error = %e, "failed to flush CSV log on shutdown");
    }
    info!("CSV writer stopped");
}

fn write_row(writer: &mut csv::Writer<std::fs::File>, row: &CsvRow) -> csv::Result<()> {
    writer.write_record(&[
        row.uuid.clone(),
        row.message_id.to_string(),
        row.sent_time.to_string(),
        row.receipt_time.to_string(),
        row.timestamp.to_string(),
        row.uri.clone(),
        row.longitude.to_string(),
        row.latitude.to_string(),
        row.temperature.to_string(),
        row.battery.to_string(),
        row.error.to_string(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(message_id: u64, error: u8) -> CsvRow {
        CsvRow {
            uuid: "dev-1".into(),
            message_id,
            sent_time: 1_700_000_000_000_000_000,
            receipt_time: 1_700_000_000_100_000_000,
            timestamp: 1_700_000_000.1,
            uri: "coap://127.0.0.1:5683/device/data".into(),
            longitude: 18.07,
            latitude: 59.33,
            temperature: 21.5,
            battery: 995.0,
            error,
        }
    }

    #[tokio::test]
    async fn header_present_even_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.csv");
        let (sink, task) = CsvSink::create(&path, 8).unwrap();
        drop(sink);
        task.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.lines().next().unwrap(),
            "uuid;message_id;sent_time;receipt_time;timestamp;uri;longitude;latitude;temperature;battery;error"
        );
    }

    #[tokio::test]
    async fn rows_drained_and_flushed_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.csv");
        let (sink, task) = CsvSink::create(&path, 8).unwrap();

        sink.append(row(1, 0)).await.unwrap();
        sink.append(row(2, 1)).await.unwrap();
        drop(sink);
        task.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("dev-1;1;"));
        assert!(lines[1].ends_with(";0"));
        assert!(lines[2].starts_with("dev-1;2;"));
        assert!(lines[2].ends_with(";1"));
    }

    #[tokio::test]
    async fn append_after_writer_stop_reports_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.csv");
        let (sink, task) = CsvSink::create(&path, 8).unwrap();
        task.abort();
        let _ = task.await;
        assert!(sink.append(row(1, 0)).await.is_err());
    }

    #[test]
    fn queue_capacity_scales_with_fleet_and_interval() {
        assert!(queue_capacity(10, Duration::from_millis(1000)) >= 300);
        assert_eq!(queue_capacity(1, Duration::from_secs(120)), 64);
    }
}
