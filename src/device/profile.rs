//! The live behavioral profile a transition interpolates.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::config::DeviceConfig;
use crate::domain::{Coordinate, DelayProfile};

/// Weighted sampler over the active delay-profile list.
///
/// The cumulative weight table is built once per list swap; draws are a
/// binary search over it. The list is validated (weights non-negative,
/// summing to 100) before it ever reaches this type.
#[derive(Debug, Clone)]
pub struct DelayTable {
    profiles: Vec<DelayProfile>,
    index: WeightedIndex<f64>,
}

impl DelayTable {
    pub fn new(profiles: Vec<DelayProfile>) -> Self {
        let index = WeightedIndex::new(profiles.iter().map(|p| p.probability))
            .expect("delay profile list validated before table construction");
        Self { profiles, index }
    }

    pub fn profiles(&self) -> &[DelayProfile] {
        &self.profiles
    }

    /// Picks a band by weight, then draws the delay uniformly from its
    /// `[min, max]` range. Returns seconds.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let band = &self.profiles[self.index.sample(rng)];
        if band.min >= band.max {
            band.min
        } else {
            rng.gen_range(band.min..=band.max)
        }
    }
}

/// Flattened snapshot of the values an active transition interpolates.
/// Mutated only by the transition task, the battery discharge path and
/// successful POSTs.
#[derive(Debug, Clone)]
pub struct CurrentProfile {
    pub temp_min: f64,
    pub temp_max: f64,
    pub drop_percentage: f64,
    pub battery_transmit_discharge: f64,
    pub battery_idle_discharge: f64,
    pub coordinate: Coordinate,
    pub delays: DelayTable,
}

impl CurrentProfile {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            temp_min: config.temperature_range.0,
            temp_max: config.temperature_range.1,
            drop_percentage: config.drop_percentage,
            battery_transmit_discharge: config.battery_transmit_discharge,
            battery_idle_discharge: config.battery_idle_discharge,
            coordinate: config.coordinate,
            delays: DelayTable::new(config.delay_profiles.clone()),
        }
    }

    /// Uniform draw from the live temperature range.
    pub fn sample_temperature(&self) -> f64 {
        if self.temp_min >= self.temp_max {
            self.temp_min
        } else {
            rand::thread_rng().gen_range(self.temp_min..=self.temp_max)
        }
    }

    /// Per-request delay draw, in seconds.
    pub fn sample_delay(&self) -> f64 {
        self.delays.sample(&mut rand::thread_rng())
    }

    /// One drop roll: `r ∈ [0, 100)` against the live drop percentage.
    pub fn roll_drop(&self) -> bool {
        rand::thread_rng().gen_range(0.0..100.0) < self.drop_percentage
    }
}
