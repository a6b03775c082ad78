//! The stateful behavioral engine of one simulated device.
//!
//! A device owns a live [`CurrentProfile`] seeded from its static config.
//! GET requests sample synthetic telemetry shaped by that profile; POST
//! requests install a target event and spawn a transition task that
//! interpolates the live values toward it. A background task drains the
//! battery while idle. Once the battery reaches zero the device is
//! discharged for the rest of the process lifetime.

pub mod event;
pub mod profile;
mod transition;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::domain::{EventType, SensorReading};
use event::{EventConfig, EventPatch};
use profile::CurrentProfile;
use transition::TransitionHandle;

/// Hold time of a simulated drop before the request fails; clients observe
/// it as a timeout.
const DROP_SLEEP: Duration = Duration::from_secs(20);

/// Cadence of the background idle-drain task.
const IDLE_DRAIN_PERIOD: Duration = Duration::from_secs(60);

/// Failures a request handler can surface to the CoAP layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Battery discharged. Device cannot process requests.")]
    Discharged,

    #[error("Simulated drop leads to client timeout/failure.")]
    Dropped,

    #[error("{0}")]
    BadRequest(String),
}

/// Mutable per-device state behind the shared lock.
pub struct DeviceState {
    pub profile: CurrentProfile,
    pub battery_charge: f64,
    pub discharged: bool,
    pub current_event: EventConfig,
    pub previous_event: Option<EventConfig>,
    pub(crate) transition: Option<TransitionHandle>,
}

impl DeviceState {
    /// Subtracts `amount` from the battery, clamping at zero. Once zero is
    /// reached the discharged flag latches for the process lifetime.
    pub(crate) fn discharge(&mut self, amount: f64) {
        self.battery_charge -= amount;
        if self.battery_charge <= 0.0 {
            self.battery_charge = 0.0;
            self.discharged = true;
        }
    }
}

pub(crate) type SharedState = Arc<RwLock<DeviceState>>;

/// Body of a successful POST reply.
#[derive(Debug, Clone, Serialize)]
pub struct EventTriggered {
    pub status: String,
    pub event: String,
    pub transition: String,
    pub event_type: EventType,
}

/// One simulated device: cheap to clone, all clones share the same state.
#[derive(Clone)]
pub struct DeviceSimulator {
    config: Arc<DeviceConfig>,
    state: SharedState,
}

impl DeviceSimulator {
    /// Builds the device from its validated config and starts the idle-drain
    /// task. Must be called from within a tokio runtime.
    pub fn new(config: DeviceConfig) -> Self {
        let profile = CurrentProfile::from_config(&config);
        let current_event = EventConfig::from_device_config(&config);
        let discharged = config.battery_charge <= 0.0;
        let state = Arc::new(RwLock::new(DeviceState {
            profile,
            battery_charge: config.battery_charge.max(0.0),
            discharged,
            current_event,
            previous_event: None,
            transition: None,
        }));

        let simulator = Self { config: Arc::new(config), state };
        simulator.spawn_idle_drain();
        simulator
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Serves one GET: drop simulation, transmit discharge, probabilistic
    /// delay, then a fresh telemetry sample.
    pub async fn handle_get(&self) -> Result<SensorReading, DeviceError> {
        let dropped = {
            let state = self.state.read().await;
            if state.discharged {
                return Err(DeviceError::Discharged);
            }
            state.profile.roll_drop()
        };

        if dropped {
            debug!("dropping request");
            sleep(DROP_SLEEP).await;
            return Err(DeviceError::Dropped);
        }

        let delay_s = {
            let mut state = self.state.write().await;
            let cost = state.profile.battery_transmit_discharge;
            state.discharge(cost);
            state.profile.sample_delay()
        };
        if delay_s > 0.0 {
            debug!(delay_s, "delaying reply");
            sleep(Duration::from_secs_f64(delay_s)).await;
        }

        // A transition or POST may have moved the profile during the delay;
        // sample from whatever is live now.
        let state = self.state.read().await;
        Ok(SensorReading {
            uuid: self.config.uuid.clone(),
            timestamp: unix_timestamp(),
            status: state.current_event.event_name.clone(),
            temperature: state.profile.sample_temperature(),
            battery: state.battery_charge,
            coordinate: state.profile.coordinate,
        })
    }

    /// Serves one POST: overlays the received patch onto the current event,
    /// cancels any in-flight transition and spawns the new one.
    ///
    /// The transmit discharge is paid up front, before the payload is even
    /// parsed.
    pub async fn handle_post(&self, payload: &[u8]) -> Result<EventTriggered, DeviceError> {
        let mut state = self.state.write().await;
        if state.discharged {
            return Err(DeviceError::Discharged);
        }
        let cost = state.profile.battery_transmit_discharge;
        state.discharge(cost);

        let patch: EventPatch = serde_json::from_slice(payload)
            .map_err(|_| DeviceError::BadRequest("Invalid JSON payload.".to_string()))?;
        let target = patch
            .overlay(&state.current_event)
            .map_err(|e| DeviceError::BadRequest(format!("Event config validation error: {e}")))?;

        info!(
            event = %target.event_name,
            event_type = %target.event_type,
            transition_s = target.transition_duration_s,
            "event trigger received"
        );

        if let Some(handle) = state.transition.take() {
            handle.cancel();
            warn!("cancelled previous transition task");
        }
        state.previous_event = None;

        let reply = EventTriggered {
            status: "Event triggered".to_string(),
            event: target.event_name.clone(),
            transition: format!("{} seconds", target.transition_duration_s),
            event_type: target.event_type,
        };
        state.transition = Some(transition::spawn(self.state.clone(), target));
        Ok(reply)
    }

    fn spawn_idle_drain(&self) {
        let state = self.state.clone();
        // Always the static config rate, never the live interpolated one.
        let rate = self.config.battery_idle_discharge;
        tokio::spawn(async move {
            loop {
                sleep(IDLE_DRAIN_PERIOD).await;
                let mut guard = state.write().await;
                if guard.discharged {
                    break;
                }
                guard.discharge(rate);
                if guard.discharged {
                    info!("battery fully discharged by idle drain");
                    break;
                }
                debug!(battery = guard.battery_charge, "idle drain tick");
            }
        });
    }

    // Introspection used by the binaries' startup logging and by tests.

    pub async fn battery_charge(&self) -> f64 {
        self.state.read().await.battery_charge
    }

    pub async fn is_discharged(&self) -> bool {
        self.state.read().await.discharged
    }

    pub async fn current_event(&self) -> EventConfig {
        self.state.read().await.current_event.clone()
    }

    pub async fn current_profile(&self) -> CurrentProfile {
        self.state.read().await.profile.clone()
    }

    pub async fn has_active_transition(&self) -> bool {
        self.state.read().await.transition.is_some()
    }
}

fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
