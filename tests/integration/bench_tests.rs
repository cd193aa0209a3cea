//! Host bench wiring: real motor backends over the simulated shaft, the
//! encoder reading that shaft, and the JSON configuration file.

use std::thread;
use std::time::Duration;

use crate::mock_hw::{RecordingSink, ReplaySensor};

use perfusion::adapters::config_file::JsonConfigFile;
use perfusion::adapters::sim::{SimAngleSensor, SimDriverBus, SimPin, SimShaft, SimStepTimer};
use perfusion::adapters::time::MonotonicClock;
use perfusion::app::ports::{ConfigError, ConfigPort};
use perfusion::app::service::PerfusionStateMachine;
use perfusion::config::{BackendKind, EndValvePolicy, PerfusionConfig};
use perfusion::drivers::{StepDirStepper, UartStepper};
use perfusion::fsm::PerfusionState;
use perfusion::fsm::context::{MotorDirection, ValveState};
use perfusion::sensors::EncoderTracker;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("perfusion-bench-{}-{}.json", name, std::process::id()))
}

#[test]
fn uart_backend_spins_shaft_counter_clockwise() {
    let config = PerfusionConfig::for_backend(BackendKind::UartDriver);
    let shaft = SimShaft::shared();
    let mut motor = UartStepper::new(
        SimDriverBus::new(shaft.clone(), config.stepper_steps_per_rev),
        config.stepper_steps_per_rev,
        config.driver_run_current_percent,
        config.driver_microsteps,
    );
    motor.begin().unwrap();
    assert_eq!(motor.bus().run_current_percent(), 60);
    assert!(motor.bus().cool_step());

    let mut sink = RecordingSink::new();
    let mut machine = PerfusionStateMachine::new(config, motor, SimPin::default()).unwrap();
    machine.boot(&mut sink).unwrap();
    assert_eq!(shaft.rpm(), 0.0);

    machine.set_flow_rate(1000.0, &mut sink).unwrap();
    machine.start_perfusion(&mut sink).unwrap();
    assert!(machine.motor().is_enabled());
    assert!(machine.motor().velocity_register() < 0);
    assert!(shaft.rpm() < 0.0);

    machine.pause_perfusion(&mut sink).unwrap();
    assert_eq!(shaft.rpm(), 0.0);
    assert_eq!(machine.motor().velocity_register(), 0);
}

#[test]
fn step_dir_priming_reaches_commanded_rpm() {
    let config = PerfusionConfig::for_backend(BackendKind::StepDir);
    let shaft = SimShaft::shared();
    let dir_pin = SimPin::default();
    let timer = SimStepTimer::new(
        shaft.clone(),
        dir_pin.clone(),
        config.stepper_steps_per_rev,
        config.stepper_microsteps,
    );
    let motor = StepDirStepper::new(
        SimPin::default(),
        dir_pin.clone(),
        timer,
        config.stepper_steps_per_rev,
        config.stepper_microsteps,
    )
    .unwrap();

    let mut sink = RecordingSink::new();
    let mut machine = PerfusionStateMachine::new(config, motor, SimPin::default()).unwrap();
    machine.boot(&mut sink).unwrap();
    machine.set_motor_speed_rpm(30.0, &mut sink).unwrap();
    machine.start_perfusion(&mut sink).unwrap();

    assert!(!dir_pin.is_high(), "counter-clockwise drives DIR low");
    assert!((shaft.rpm() + 30.0).abs() < 1e-3);

    machine.end_perfusion(&mut sink).unwrap();
    assert_eq!(shaft.rpm(), 0.0);
    assert!(!machine.motor().is_enabled());
}

#[test]
fn encoder_follows_simulated_shaft() {
    let shaft = SimShaft::shared();
    let clock = MonotonicClock::new();
    let mut encoder = EncoderTracker::new(SimAngleSensor::new(shaft.clone()));

    encoder.poll(clock.uptime_us()).unwrap();
    shaft.set_rpm(-6.0);
    thread::sleep(Duration::from_millis(20));
    encoder.poll(clock.uptime_us()).unwrap();

    assert_eq!(encoder.direction(), MotorDirection::CounterClockWise);
    assert!(encoder.total_counts() < 0);
    assert!(encoder.speed_rpm() > 0.0);
}

#[test]
fn travel_from_encoder_ends_run_at_limit() {
    let mut config = PerfusionConfig::default();
    config.end_position = 5;
    let shaft = SimShaft::shared();
    let mut motor = UartStepper::new(SimDriverBus::new(shaft.clone(), 200), 200, 60, 256);
    motor.begin().unwrap();

    let mut sink = RecordingSink::new();
    let travel_sign = config.perfusion_direction.sign();
    let mut machine = PerfusionStateMachine::new(config, motor, SimPin::default()).unwrap();
    machine.boot(&mut sink).unwrap();
    machine.start_perfusion(&mut sink).unwrap();

    // Counter-clockwise shaft motion is positive travel.
    let mut encoder = EncoderTracker::new(ReplaySensor::new(&[1000, 960]));
    encoder.poll(0).unwrap();
    encoder.poll(10_000).unwrap();
    let travel = (encoder.total_counts() as f32 * travel_sign) as i32;
    assert_eq!(travel, 40);

    machine.set_travel_position(travel);
    machine.tick(&mut sink).unwrap();
    assert_eq!(machine.state(), PerfusionState::Idle);
    assert_eq!(shaft.rpm(), 0.0);
}

#[test]
fn config_file_round_trip_drives_the_machine() {
    let path = temp_path("round-trip");
    let port = JsonConfigFile::new(&path);

    let mut config = PerfusionConfig::default();
    config.target_pressure_mmhg = 0.5;
    config.end_valve_policy = EndValvePolicy::DrainOpen;
    config.valve_active_high = false;
    port.save(&config).unwrap();

    let loaded = port.load().unwrap();
    assert_eq!(loaded.end_valve_policy, EndValvePolicy::DrainOpen);
    assert!(!loaded.valve_active_high);

    let valve_pin = SimPin::default();
    let mut sink = RecordingSink::new();
    let motor = UartStepper::new(SimDriverBus::new(SimShaft::shared(), 200), 200, 60, 256);
    let mut machine = PerfusionStateMachine::new(loaded, motor, valve_pin.clone()).unwrap();
    machine.boot(&mut sink).unwrap();
    assert!(valve_pin.is_high(), "active-low valve is closed with the pin high");

    machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Open);
    assert!(!valve_pin.is_high());

    std::fs::remove_file(&path).ok();
}

#[test]
fn invalid_config_file_is_rejected() {
    let path = temp_path("invalid");
    let mut config = PerfusionConfig::default();
    config.control_loop_interval_ms = 0;
    std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

    let port = JsonConfigFile::new(&path);
    assert!(matches!(port.load(), Err(ConfigError::ValidationFailed(_))));
    assert!(matches!(port.save(&config), Err(ConfigError::ValidationFailed(_))));

    std::fs::write(&path, "{ not json").unwrap();
    assert_eq!(port.load().unwrap_err(), ConfigError::Corrupted);

    std::fs::remove_file(&path).ok();
}
