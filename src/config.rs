use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use validator::{Validate, ValidationError};

use crate::domain::{validate_delay_profiles, Coordinate, DelayProfile};

/// Static per-device configuration, loaded once at startup and immutable
/// afterwards. The live behavioral profile is seeded from this.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_device_config"))]
pub struct DeviceConfig {
    #[validate(length(min = 1))]
    pub uuid: String,

    /// `(min, max)` bounds the simulated temperature is drawn from.
    pub temperature_range: (f64, f64),

    /// Initial battery charge, in arbitrary charge units.
    #[validate(range(min = 0.0))]
    pub battery_charge: f64,

    /// Units consumed by every served request (GET or POST).
    #[validate(range(min = 0.0))]
    pub battery_transmit_discharge: f64,

    /// Units consumed per idle tick of the background drain task.
    #[validate(range(min = 0.0))]
    pub battery_idle_discharge: f64,

    /// Percentage of GET requests deliberately dropped.
    #[validate(range(min = 0.0, max = 100.0))]
    pub drop_percentage: f64,

    #[validate(nested)]
    pub delay_profiles: Vec<DelayProfile>,

    pub coordinate: Coordinate,

    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Ordered CoAP path segments of the single exposed resource.
    #[serde(default = "default_resource_path")]
    pub resource_path: Vec<String>,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5683
}

fn default_resource_path() -> Vec<String> {
    vec!["device".to_string(), "data".to_string()]
}

fn validate_device_config(config: &DeviceConfig) -> Result<(), ValidationError> {
    let (temp_min, temp_max) = config.temperature_range;
    if !temp_min.is_finite() || !temp_max.is_finite() || temp_min > temp_max {
        return Err(ValidationError::new(
            "temperature_range must be finite with min <= max",
        ));
    }
    if config.resource_path.is_empty() || config.resource_path.iter().any(|s| s.is_empty()) {
        return Err(ValidationError::new(
            "resource_path must contain at least one non-empty segment",
        ));
    }
    validate_delay_profiles(&config.delay_profiles)
}

impl DeviceConfig {
    /// Load and validate a device configuration from a JSON file.
    ///
    /// Any structural or invariant violation (malformed JSON, missing field,
    /// delay-profile probabilities not summing to 100) is fatal to the caller.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device config {}", path.display()))?;
        let config: DeviceConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse device config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Device config validation failed for {}", path.display()))?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server_host, self.server_port)
            .parse()
            .context("Failed to parse device bind address")
    }

    /// The resource path as a single `/`-joined string, the form CoAP
    /// requests carry it in.
    pub fn resource_path_string(&self) -> String {
        self.resource_path.join("/")
    }
}
