//! Event records and the partial-update overlay applied on POST.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::domain::{validate_delay_profiles, Coordinate, DelayProfile, EventType};

/// Name of the baseline event every device starts in.
pub const BASELINE_EVENT: &str = "Normal";

#[derive(Debug, Error)]
pub enum EventValidationError {
    #[error("temperature_range must be finite with min <= max")]
    TemperatureRange,

    #[error("drop_percentage must lie within [0, 100]")]
    DropPercentage,

    #[error("battery discharge rates must be non-negative")]
    DischargeRate,

    #[error("event durations must be non-negative and finite")]
    Duration,

    #[error("invalid delay profiles: {0}")]
    DelayProfiles(String),
}

/// A fully resolved behavioral overlay. Immutable once constructed; the
/// transition task interpolates the live profile toward these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    pub event_name: String,
    pub event_type: EventType,
    pub temperature_range: (f64, f64),
    pub battery_transmit_discharge: f64,
    pub battery_idle_discharge: f64,
    pub drop_percentage: f64,
    pub delay_profiles: Vec<DelayProfile>,
    pub coordinate: Coordinate,
    pub transition_duration_s: f64,
    pub transient_event_duration_s: f64,
    pub transient_event_return_s: f64,
}

impl EventConfig {
    /// The baseline event a device boots into, mirroring its static config.
    pub fn from_device_config(config: &DeviceConfig) -> Self {
        Self {
            event_name: BASELINE_EVENT.to_string(),
            event_type: EventType::Permanent,
            temperature_range: config.temperature_range,
            battery_transmit_discharge: config.battery_transmit_discharge,
            battery_idle_discharge: config.battery_idle_discharge,
            drop_percentage: config.drop_percentage,
            delay_profiles: config.delay_profiles.clone(),
            coordinate: config.coordinate,
            transition_duration_s: 0.0,
            transient_event_duration_s: 0.0,
            transient_event_return_s: 0.0,
        }
    }

    /// Whole-record validation, run after every overlay.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        let (min, max) = self.temperature_range;
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(EventValidationError::TemperatureRange);
        }
        if !(0.0..=100.0).contains(&self.drop_percentage) {
            return Err(EventValidationError::DropPercentage);
        }
        if self.battery_transmit_discharge < 0.0 || self.battery_idle_discharge < 0.0 {
            return Err(EventValidationError::DischargeRate);
        }
        for duration in [
            self.transition_duration_s,
            self.transient_event_duration_s,
            self.transient_event_return_s,
        ] {
            if !duration.is_finite() || duration < 0.0 {
                return Err(EventValidationError::Duration);
            }
        }
        validate_delay_profiles(&self.delay_profiles)
            .map_err(|e| EventValidationError::DelayProfiles(e.code.to_string()))?;
        Ok(())
    }
}

/// The POST body: a patch, not a replacement. Every absent field is
/// inherited from the event currently in effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_range: Option<(f64, f64)>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_transmit_discharge: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_idle_discharge: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_percentage: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_profiles: Option<Vec<DelayProfile>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_duration_s: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient_event_duration_s: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient_event_return_s: Option<f64>,
}

impl EventPatch {
    /// Validates only the fields present in the patch. Whole-record
    /// validation still happens on the device after the overlay; this exists
    /// so schedule files can be rejected before any dispatch.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if let Some((min, max)) = self.temperature_range {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(EventValidationError::TemperatureRange);
            }
        }
        if let Some(drop) = self.drop_percentage {
            if !(0.0..=100.0).contains(&drop) {
                return Err(EventValidationError::DropPercentage);
            }
        }
        for rate in [self.battery_transmit_discharge, self.battery_idle_discharge]
            .into_iter()
            .flatten()
        {
            if rate < 0.0 {
                return Err(EventValidationError::DischargeRate);
            }
        }
        for duration in [
            self.transition_duration_s,
            self.transient_event_duration_s,
            self.transient_event_return_s,
        ]
        .into_iter()
        .flatten()
        {
            if !duration.is_finite() || duration < 0.0 {
                return Err(EventValidationError::Duration);
            }
        }
        if let Some(profiles) = &self.delay_profiles {
            if !profiles.is_empty() {
                validate_delay_profiles(profiles)
                    .map_err(|e| EventValidationError::DelayProfiles(e.code.to_string()))?;
            }
        }
        Ok(())
    }

    /// Field-wise coalesce of this patch over `current`, then whole-record
    /// validation. An empty delay-profile list counts as unspecified.
    pub fn overlay(&self, current: &EventConfig) -> Result<EventConfig, EventValidationError> {
        let delay_profiles = match &self.delay_profiles {
            Some(list) if !list.is_empty() => list.clone(),
            _ => current.delay_profiles.clone(),
        };
        let merged = EventConfig {
            event_name: self
                .event_name
                .clone()
                .unwrap_or_else(|| current.event_name.clone()),
            event_type: self.event_type.unwrap_or(current.event_type),
            temperature_range: self.temperature_range.unwrap_or(current.temperature_range),
            battery_transmit_discharge: self
                .battery_transmit_discharge
                .unwrap_or(current.battery_transmit_discharge),
            battery_idle_discharge: self
                .battery_idle_discharge
                .unwrap_or(current.battery_idle_discharge),
            drop_percentage: self.drop_percentage.unwrap_or(current.drop_percentage),
            delay_profiles,
            coordinate: self.coordinate.unwrap_or(current.coordinate),
            transition_duration_s: self
                .transition_duration_s
                .unwrap_or(current.transition_duration_s),
            transient_event_duration_s: self
                .transient_event_duration_s
                .unwrap_or(current.transient_event_duration_s),
            transient_event_return_s: self
                .transient_event_return_s
                .unwrap_or(current.transient_event_return_s),
        };
        merged.validate()?;
        Ok(merged)
    }
}
