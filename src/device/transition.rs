//! Gradual profile transitions and the transient event sequence.
//!
//! At most one transition task runs per device. A newly accepted POST
//! cancels the running task through its token; the task observes the
//! cancellation at its next suspension point and never finalizes.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DeviceState, SharedState};
use crate::device::event::EventConfig;
use crate::device::profile::DelayTable;
use crate::domain::{Coordinate, EventType};

/// Update cadence of the interpolation loop.
const TICK: Duration = Duration::from_secs(1);

/// Linear interpolation of one scalar.
pub(crate) fn lerp(start: f64, target: f64, progress: f64) -> f64 {
    start + (target - start) * progress
}

/// Handle to the in-flight transition task, owned by the device state.
#[derive(Debug)]
pub(crate) struct TransitionHandle {
    token: CancellationToken,
}

impl TransitionHandle {
    /// Marks the task cancelled. It stops at its next suspension point;
    /// live values stay where the interpolation left them.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

/// Spawns the transition task for an accepted target event.
pub(crate) fn spawn(state: SharedState, target: EventConfig) -> TransitionHandle {
    let token = CancellationToken::new();
    match target.event_type {
        EventType::Permanent => {
            tokio::spawn(run_permanent(state, target, token.clone()));
        }
        EventType::Transient => {
            tokio::spawn(run_transient(state, target, token.clone()));
        }
    }
    TransitionHandle { token }
}

async fn run_permanent(state: SharedState, target: EventConfig, token: CancellationToken) {
    let duration = target.transition_duration_s;
    if apply_gradual(&state, &target, duration, &token).await {
        clear_handle(&state, &token).await;
    }
}

async fn run_transient(state: SharedState, target: EventConfig, token: CancellationToken) {
    // Snapshot the event to return to before anything moves.
    let mut previous = {
        let mut guard = state.write().await;
        let previous = guard.current_event.clone();
        guard.previous_event = Some(previous.clone());
        previous
    };

    if !apply_gradual(&state, &target, target.transition_duration_s, &token).await {
        return;
    }

    info!(
        hold_s = target.transient_event_duration_s,
        "transient event active"
    );
    let hold = Duration::from_secs_f64(target.transient_event_duration_s.max(0.0));
    tokio::select! {
        _ = token.cancelled() => return,
        _ = sleep(hold) => {}
    }

    // Mobility changes are never reverted: return to the previous event at
    // the coordinate the device has meanwhile reached.
    previous.coordinate = state.read().await.profile.coordinate;

    info!(
        return_s = target.transient_event_return_s,
        event = %previous.event_name,
        "returning to previous event"
    );
    if !apply_gradual(&state, &previous, target.transient_event_return_s, &token).await {
        return;
    }

    let mut guard = state.write().await;
    guard.previous_event = None;
    if !token.is_cancelled() {
        guard.transition = None;
    }
}

async fn clear_handle(state: &SharedState, token: &CancellationToken) {
    let mut guard = state.write().await;
    if !token.is_cancelled() {
        guard.transition = None;
    }
}

/// Interpolates every live scalar from its value at entry to the target over
/// `duration_s`, ticking at ~1 Hz. Returns `false` if cancelled.
///
/// On completion every field is set exactly to its target (no floating-point
/// drift) and `current_event` becomes the target event.
async fn apply_gradual(
    state: &SharedState,
    target: &EventConfig,
    duration_s: f64,
    token: &CancellationToken,
) -> bool {
    info!(
        event = %target.event_name,
        duration_s,
        "starting gradual transition"
    );

    let start = Snapshot::capture(&*state.read().await);
    let duration_s = duration_s.max(0.0);
    let duration = Duration::from_secs_f64(duration_s);
    let started = Instant::now();
    let mut delays_swapped = false;

    loop {
        let elapsed = started.elapsed();
        if elapsed >= duration {
            break;
        }
        let progress = (elapsed.as_secs_f64() / duration_s).clamp(0.0, 1.0);

        {
            let mut guard = state.write().await;
            start.apply(&mut guard, target, progress);
            if !delays_swapped && progress >= 0.5 {
                guard.profile.delays = DelayTable::new(target.delay_profiles.clone());
                delays_swapped = true;
            }
        }

        if elapsed.as_secs() % 10 == 0 {
            debug!(progress = format!("{:.0}%", progress * 100.0), "transition progress");
        }

        tokio::select! {
            _ = token.cancelled() => {
                debug!(event = %target.event_name, "transition cancelled");
                return false;
            }
            _ = sleep(TICK) => {}
        }
    }

    if token.is_cancelled() {
        debug!(event = %target.event_name, "transition cancelled");
        return false;
    }

    let mut guard = state.write().await;
    if token.is_cancelled() {
        return false;
    }
    guard.profile.temp_min = target.temperature_range.0;
    guard.profile.temp_max = target.temperature_range.1;
    guard.profile.drop_percentage = target.drop_percentage;
    guard.profile.battery_transmit_discharge = target.battery_transmit_discharge;
    guard.profile.battery_idle_discharge = target.battery_idle_discharge;
    guard.profile.coordinate = target.coordinate;
    guard.profile.delays = DelayTable::new(target.delay_profiles.clone());
    guard.current_event = target.clone();
    info!(event = %target.event_name, "transition complete");
    true
}

/// Live values captured at transition entry; interpolation runs from these.
struct Snapshot {
    temp_min: f64,
    temp_max: f64,
    drop_percentage: f64,
    battery_transmit_discharge: f64,
    battery_idle_discharge: f64,
    coordinate: Coordinate,
}

impl Snapshot {
    fn capture(state: &DeviceState) -> Self {
        Self {
            temp_min: state.profile.temp_min,
            temp_max: state.profile.temp_max,
            drop_percentage: state.profile.drop_percentage,
            battery_transmit_discharge: state.profile.battery_transmit_discharge,
            battery_idle_discharge: state.profile.battery_idle_discharge,
            coordinate: state.profile.coordinate,
        }
    }

    fn apply(&self, state: &mut DeviceState, target: &EventConfig, progress: f64) {
        state.profile.temp_min = lerp(self.temp_min, target.temperature_range.0, progress);
        state.profile.temp_max = lerp(self.temp_max, target.temperature_range.1, progress);
        state.profile.drop_percentage =
            lerp(self.drop_percentage, target.drop_percentage, progress);
        state.profile.battery_transmit_discharge = lerp(
            self.battery_transmit_discharge,
            target.battery_transmit_discharge,
            progress,
        );
        state.profile.battery_idle_discharge = lerp(
            self.battery_idle_discharge,
            target.battery_idle_discharge,
            progress,
        );
        state.profile.coordinate = self.coordinate.lerp(&target.coordinate, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lerp_endpoints_and_midpoint() {
        assert_eq!(lerp(0.0, 10.0, 0.0), 0.0);
        assert_eq!(lerp(0.0, 10.0, 1.0), 10.0);
        assert_eq!(lerp(0.0, 10.0, 0.5), 5.0);
        assert_eq!(lerp(10.0, 0.0, 0.5), 5.0);
    }

    proptest! {
        /// During a transition every interpolated scalar lies within
        /// `[min(start, target), max(start, target)]`.
        #[test]
        fn lerp_stays_within_bounds(
            start in -1000.0f64..1000.0,
            target in -1000.0f64..1000.0,
            progress in 0.0f64..=1.0,
        ) {
            let value = lerp(start, target, progress);
            prop_assert!(value >= start.min(target) - 1e-9);
            prop_assert!(value <= start.max(target) + 1e-9);
        }

        /// Progress 1 lands on the target up to floating-point rounding;
        /// the finalization pass removes the residual drift.
        #[test]
        fn lerp_converges(start in -1000.0f64..1000.0, target in -1000.0f64..1000.0) {
            prop_assert!((lerp(start, target, 1.0) - target).abs() <= 1e-9);
        }
    }
}
