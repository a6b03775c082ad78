//! Domain types shared by the simulator, coordinator and gateway.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Geographic position of a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Componentwise linear interpolation toward `target`.
    ///
    /// `progress` is expected in `[0, 1]`; 0 returns `self`, 1 returns `target`.
    pub fn lerp(&self, target: &Coordinate, progress: f64) -> Coordinate {
        Coordinate {
            latitude: self.latitude + (target.latitude - self.latitude) * progress,
            longitude: self.longitude + (target.longitude - self.longitude) * progress,
        }
    }
}

/// One weighted delay band.
///
/// A device draws its per-request delay from the union of all configured
/// bands, each band selected with probability `probability` percent, and the
/// delay itself drawn uniformly from `[min, max]` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DelayProfile {
    #[validate(range(min = 0.0, max = 100.0))]
    pub probability: f64,

    #[validate(range(min = 0.0))]
    pub min: f64,

    #[validate(range(min = 0.0))]
    pub max: f64,
}

/// Tolerance for the probability-sum check.
const PROBABILITY_SUM_EPSILON: f64 = 1e-9;

/// Validates a delay profile list: non-empty, each band well-formed, and the
/// probability weights summing to exactly 100.
pub fn validate_delay_profiles(profiles: &[DelayProfile]) -> Result<(), ValidationError> {
    if profiles.is_empty() {
        return Err(ValidationError::new("delay_profiles must not be empty"));
    }
    for profile in profiles {
        if profile.validate().is_err() {
            return Err(ValidationError::new(
                "delay profile fields must be non-negative, probability within [0, 100]",
            ));
        }
        if profile.min > profile.max {
            return Err(ValidationError::new("delay profile min must not exceed max"));
        }
    }
    let total: f64 = profiles.iter().map(|p| p.probability).sum();
    if (total - 100.0).abs() > PROBABILITY_SUM_EPSILON {
        return Err(ValidationError::new(
            "delay profile probabilities must sum to 100",
        ));
    }
    Ok(())
}

/// Body of a successful CoAP GET reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub uuid: String,
    /// Seconds since the UNIX epoch, fractional.
    pub timestamp: f64,
    /// Name of the event currently shaping the device's behavior.
    pub status: String,
    pub temperature: f64,
    pub battery: f64,
    pub coordinate: Coordinate,
}

/// Whether an event persists or reverts after a hold period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Permanent,
    Transient,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Permanent => write!(f, "permanent"),
            EventType::Transient => write!(f, "transient"),
        }
    }
}
