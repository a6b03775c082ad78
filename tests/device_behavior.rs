//! Timing-dependent device behavior, run against tokio's paused clock so
//! multi-second transitions resolve instantly and deterministically.

mod common;

use std::time::Duration;

use tokio::time::{sleep, Instant};

use iot_sensor_sim::device::{DeviceError, DeviceSimulator};

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

async fn post(device: &DeviceSimulator, body: serde_json::Value) {
    device
        .handle_post(&serde_json::to_vec(&body).unwrap())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn permanent_transition_reaches_target() {
    let device = DeviceSimulator::new(common::device_config("s1"));
    post(
        &device,
        serde_json::json!({
            "event_name": "Hot",
            "event_type": "permanent",
            "temperature_range": [80.0, 82.0],
            "transition_duration_s": 10.0
        }),
    )
    .await;

    sleep(secs(10.5)).await;

    let reading = device.handle_get().await.unwrap();
    assert_eq!(reading.status, "Hot");
    assert!(reading.temperature >= 80.0 && reading.temperature <= 82.0);
    assert!(!device.has_active_transition().await);
}

#[tokio::test(start_paused = true)]
async fn transition_values_stay_within_start_target_bounds() {
    let device = DeviceSimulator::new(common::device_config("bounds"));
    post(
        &device,
        serde_json::json!({
            "event_name": "Hot",
            "temperature_range": [80.0, 82.0],
            "drop_percentage": 50.0,
            "transition_duration_s": 10.0
        }),
    )
    .await;

    let started = Instant::now();
    for checkpoint in [2.2, 5.2, 8.2] {
        sleep(secs(checkpoint) - started.elapsed()).await;
        let profile = device.current_profile().await;
        assert!(profile.temp_min >= 20.0 && profile.temp_min <= 80.0);
        assert!(profile.temp_max >= 22.0 && profile.temp_max <= 82.0);
        assert!(profile.drop_percentage >= 0.0 && profile.drop_percentage <= 50.0);
    }
}

#[tokio::test(start_paused = true)]
async fn transition_converges_exactly_after_duration() {
    let device = DeviceSimulator::new(common::device_config("converge"));
    post(
        &device,
        serde_json::json!({
            "event_name": "Shifted",
            "temperature_range": [77.7, 99.9],
            "drop_percentage": 33.3,
            "coordinate": {"latitude": 10.123, "longitude": -4.5},
            "transition_duration_s": 7.0
        }),
    )
    .await;

    sleep(secs(7.5)).await;

    let profile = device.current_profile().await;
    assert_eq!(profile.temp_min, 77.7);
    assert_eq!(profile.temp_max, 99.9);
    assert_eq!(profile.drop_percentage, 33.3);
    assert_eq!(profile.coordinate.latitude, 10.123);
    assert_eq!(profile.coordinate.longitude, -4.5);
    assert_eq!(device.current_event().await.event_name, "Shifted");
}

#[tokio::test(start_paused = true)]
async fn transient_event_returns_to_previous() {
    let device = DeviceSimulator::new(common::device_config("s2"));
    post(
        &device,
        serde_json::json!({
            "event_name": "Spike",
            "event_type": "transient",
            "temperature_range": [100.0, 100.0],
            "transition_duration_s": 2.0,
            "transient_event_duration_s": 3.0,
            "transient_event_return_s": 2.0
        }),
    )
    .await;

    // mid-hold: pinned at the spike target
    sleep(secs(2.5)).await;
    let reading = device.handle_get().await.unwrap();
    assert_eq!(reading.status, "Spike");
    assert_eq!(reading.temperature, 100.0);

    // after hold + return transition: back to the baseline event
    sleep(secs(5.1)).await;
    let reading = device.handle_get().await.unwrap();
    assert_eq!(reading.status, "Normal");
    assert!(reading.temperature >= 20.0 && reading.temperature <= 22.0);
    assert!(!device.has_active_transition().await);
}

#[tokio::test(start_paused = true)]
async fn new_post_cancels_inflight_transition() {
    let device = DeviceSimulator::new(common::device_config("s3"));
    post(
        &device,
        serde_json::json!({
            "event_name": "A",
            "temperature_range": [50.0, 52.0],
            "transition_duration_s": 60.0
        }),
    )
    .await;

    sleep(secs(5.0)).await;
    post(
        &device,
        serde_json::json!({
            "event_name": "B",
            "temperature_range": [40.0, 42.0],
            "transition_duration_s": 10.0
        }),
    )
    .await;

    sleep(secs(15.0)).await;
    assert_eq!(device.current_event().await.event_name, "B");
    let profile = device.current_profile().await;
    assert_eq!(profile.temp_min, 40.0);
    assert_eq!(profile.temp_max, 42.0);

    // the cancelled task must never finalize A, no matter how long we wait
    sleep(secs(60.0)).await;
    assert_eq!(device.current_event().await.event_name, "B");
}

#[tokio::test(start_paused = true)]
async fn post_storm_settles_on_last_target() {
    let device = DeviceSimulator::new(common::device_config("storm"));
    for i in 0..5 {
        post(
            &device,
            serde_json::json!({
                "event_name": format!("E{i}"),
                "temperature_range": [30.0 + i as f64, 31.0 + i as f64],
                "transition_duration_s": 30.0
            }),
        )
        .await;
        sleep(secs(0.2)).await;
    }
    assert!(device.has_active_transition().await);

    sleep(secs(31.0)).await;
    assert_eq!(device.current_event().await.event_name, "E4");
    assert_eq!(device.current_profile().await.temp_min, 34.0);

    sleep(secs(30.0)).await;
    assert_eq!(device.current_event().await.event_name, "E4");
}

#[tokio::test(start_paused = true)]
async fn dropped_request_holds_and_spares_the_battery() {
    let mut config = common::device_config("s4");
    config.drop_percentage = 100.0;
    let device = DeviceSimulator::new(config);

    let before = device.battery_charge().await;
    let started = Instant::now();
    let err = device.handle_get().await.unwrap_err();
    assert!(matches!(err, DeviceError::Dropped));
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert_eq!(device.battery_charge().await, before);
}

#[tokio::test(start_paused = true)]
async fn battery_is_monotone_and_discharge_latches() {
    let mut config = common::device_config("drain");
    config.battery_charge = 3.0;
    let device = DeviceSimulator::new(config);

    let mut previous = device.battery_charge().await;
    for _ in 0..3 {
        let reading = device.handle_get().await.unwrap();
        assert!(reading.battery <= previous);
        previous = reading.battery;
    }
    assert!(device.is_discharged().await);

    // every subsequent request is rejected, forever
    for _ in 0..5 {
        assert!(matches!(device.handle_get().await, Err(DeviceError::Discharged)));
        assert!(matches!(device.handle_post(b"{}").await, Err(DeviceError::Discharged)));
    }
}

#[tokio::test(start_paused = true)]
async fn idle_drain_uses_the_static_config_rate() {
    let mut config = common::device_config("idle");
    config.battery_charge = 10.0;
    config.battery_idle_discharge = 4.0;
    config.battery_transmit_discharge = 0.0;
    let device = DeviceSimulator::new(config);

    // an event lowering the live idle rate must not slow the drain task
    post(
        &device,
        serde_json::json!({
            "event_name": "Eco",
            "battery_idle_discharge": 0.0,
            "transition_duration_s": 0.0
        }),
    )
    .await;
    sleep(secs(1.0)).await;
    assert_eq!(device.current_profile().await.battery_idle_discharge, 0.0);

    sleep(secs(60.0)).await;
    assert_eq!(device.battery_charge().await, 6.0);

    sleep(secs(120.0)).await;
    assert!(device.is_discharged().await);
    assert_eq!(device.battery_charge().await, 0.0);
}

#[tokio::test(start_paused = true)]
async fn delay_profiles_swap_in_one_step_at_half_progress() {
    let device = DeviceSimulator::new(common::device_config("swap"));
    post(
        &device,
        serde_json::json!({
            "event_name": "Slow",
            "delay_profiles": [
                {"probability": 30.0, "min": 5.0, "max": 5.0},
                {"probability": 70.0, "min": 9.0, "max": 9.0}
            ],
            "transition_duration_s": 10.0
        }),
    )
    .await;

    sleep(secs(4.2)).await;
    let before = device.current_profile().await;
    assert_eq!(before.delays.profiles().len(), 1);
    let sum: f64 = before.delays.profiles().iter().map(|p| p.probability).sum();
    assert_eq!(sum, 100.0);

    sleep(secs(2.0)).await;
    let after = device.current_profile().await;
    assert_eq!(after.delays.profiles().len(), 2);
    let sum: f64 = after.delays.profiles().iter().map(|p| p.probability).sum();
    assert_eq!(sum, 100.0);
}

#[tokio::test(start_paused = true)]
async fn transient_return_keeps_the_new_coordinate() {
    let device = DeviceSimulator::new(common::device_config("move"));
    post(
        &device,
        serde_json::json!({
            "event_name": "Relocate",
            "event_type": "transient",
            "temperature_range": [90.0, 90.0],
            "coordinate": {"latitude": 60.0, "longitude": 20.0},
            "transition_duration_s": 2.0,
            "transient_event_duration_s": 1.0,
            "transient_event_return_s": 2.0
        }),
    )
    .await;

    sleep(secs(6.0)).await;
    let profile = device.current_profile().await;
    // temperature reverted, mobility did not
    assert_eq!(profile.temp_min, 20.0);
    assert_eq!(profile.coordinate.latitude, 60.0);
    assert_eq!(profile.coordinate.longitude, 20.0);
    assert_eq!(device.current_event().await.event_name, "Normal");
}
