//! Integration tests for the PerfusionStateMachine → FSM → actuators pipeline.
//!
//! These run on the host and verify that commands reach the motor backend
//! and the valve pin exactly as intended, with no real hardware.

use crate::mock_hw::{CountingPin, MotorCall, RecordingMotor, RecordingSink};

use perfusion::app::commands::{AppCommand, parse_packet};
use perfusion::app::events::AppEvent;
use perfusion::app::service::PerfusionStateMachine;
use perfusion::config::{EndValvePolicy, FlowCalibration, PerfusionConfig};
use perfusion::error::{ActuatorError, Error};
use perfusion::fsm::context::{MotorDirection, ValveState};
use perfusion::fsm::{Disposition, PerfusionCommand, PerfusionState};

type Machine = PerfusionStateMachine<RecordingMotor, CountingPin>;

fn floor_velocity() -> f32 {
    FlowCalibration::UART_DRIVER_REV2.floor_velocity()
}

fn make_machine_with(config: PerfusionConfig) -> (Machine, RecordingMotor, CountingPin, RecordingSink) {
    let motor = RecordingMotor::new();
    let pin = CountingPin::new();
    let mut sink = RecordingSink::new();
    let mut machine = PerfusionStateMachine::new(config, motor.clone(), pin.clone()).unwrap();
    machine.boot(&mut sink).unwrap();
    (machine, motor, pin, sink)
}

fn make_machine() -> (Machine, RecordingMotor, CountingPin, RecordingSink) {
    make_machine_with(PerfusionConfig::default())
}

// ── Boot ──────────────────────────────────────────────────────

#[test]
fn boot_is_idle_with_valve_closed_and_motor_disabled() {
    let (machine, motor, pin, sink) = make_machine();
    assert_eq!(machine.state(), PerfusionState::Idle);
    assert_eq!(machine.valve_state(), ValveState::Closed);
    assert_eq!(machine.motor_direction(), MotorDirection::Stop);
    assert!(!pin.is_high());
    assert_eq!(pin.writes(), 1, "construction drives the valve once");
    assert_eq!(*motor.calls.borrow(), vec![MotorCall::Disable]);
    assert_eq!(sink.events[0], AppEvent::Started(PerfusionState::Idle));
}

// ── Start ─────────────────────────────────────────────────────

#[test]
fn start_enables_motor_at_floor_velocity_in_perfusion_direction() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    let d = machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(d, Disposition::Transition(PerfusionState::Perfusing));
    assert_eq!(machine.state(), PerfusionState::Perfusing);
    assert_eq!(machine.motor_direction(), MotorDirection::CounterClockWise);

    let calls = motor.calls.borrow();
    assert_eq!(calls[1], MotorCall::Enable);
    let MotorCall::SetVelocity(v) = calls[2] else {
        panic!("expected velocity command, got {:?}", calls[2]);
    };
    assert!((v + floor_velocity()).abs() < 1e-4);
    assert!(sink.events.contains(&AppEvent::StateChanged {
        from: PerfusionState::Idle,
        to: PerfusionState::Perfusing,
    }));
}

#[test]
fn start_opens_valve_when_pressure_above_target() {
    // Boot pressure is 2.0 against a 1.0 target.
    let (mut machine, _motor, pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Open);
    assert!(pin.is_high());
    assert!(sink.events.contains(&AppEvent::ValveChanged(ValveState::Open)));
}

#[test]
fn start_at_end_position_stays_idle() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    machine.set_end_position(400).unwrap();
    machine.set_travel_position(400);
    let d = machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(d, Disposition::Handled);
    assert_eq!(machine.state(), PerfusionState::Idle);
    assert!(!motor.is_enabled());
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::StateChanged { .. })),
        0
    );
}

// ── Valve policy ──────────────────────────────────────────────

#[test]
fn ticks_never_rewrite_an_unchanged_valve() {
    let (mut machine, _motor, pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    let writes = pin.writes();
    for _ in 0..20 {
        machine.tick(&mut sink).unwrap();
    }
    assert_eq!(pin.writes(), writes);
}

#[test]
fn valve_follows_pressure_telemetry_while_perfusing() {
    let (mut machine, _motor, _pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Open);

    machine.update_telemetry("0,0,0.5,0,0,0,0,0,STOP,0,");
    machine.tick(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Closed);

    machine.set_current_pressure(3.0);
    machine.tick(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Open);
}

#[test]
fn target_pressure_moves_the_threshold() {
    let (mut machine, _motor, _pin, mut sink) = make_machine();
    machine.set_target_pressure(5.0).unwrap();
    machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Closed);
    assert!(matches!(machine.set_target_pressure(f32::NAN), Err(Error::Config(_))));
    assert!((machine.target_pressure() - 5.0).abs() < f32::EPSILON);
}

// ── Pause / continue ──────────────────────────────────────────

#[test]
fn pause_disables_motor_and_closes_valve() {
    let (mut machine, motor, pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    machine.pause_perfusion(&mut sink).unwrap();
    assert_eq!(machine.state(), PerfusionState::Paused);
    assert!(!motor.is_enabled());
    assert_eq!(motor.velocity(), 0.0);
    assert_eq!(machine.valve_state(), ValveState::Closed);
    assert!(!pin.is_high());
    assert_eq!(machine.motor_direction(), MotorDirection::Stop);
}

#[test]
fn continue_resumes_at_configured_flow() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    machine.pause_perfusion(&mut sink).unwrap();
    machine.set_flow_rate(2.0, &mut sink).unwrap();
    assert!(!motor.is_enabled(), "flow change while paused must not start the motor");

    machine.continue_perfusion(&mut sink).unwrap();
    assert_eq!(machine.state(), PerfusionState::Perfusing);
    assert!(motor.is_enabled());
    let expected = -2.0 * FlowCalibration::UART_DRIVER_REV2.gain;
    assert!((motor.velocity() - expected).abs() < 1e-3);
}

#[test]
fn flow_change_while_perfusing_recommands_motor() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    let before = motor.call_count();
    machine.set_flow_rate(3.0, &mut sink).unwrap();
    assert_eq!(motor.call_count(), before + 1, "only a velocity write");
    assert!((machine.effective_flow_rate() - 3.0).abs() < f32::EPSILON);

    machine.set_flow_rate(0.01, &mut sink).unwrap();
    assert!((machine.effective_flow_rate() - 0.1).abs() < 1e-6);
    assert!((motor.velocity() + floor_velocity()).abs() < 1e-4);
}

// ── End ───────────────────────────────────────────────────────

#[test]
fn end_from_every_state_returns_to_idle() {
    for setup in [
        &[][..],
        &[PerfusionCommand::Start][..],
        &[PerfusionCommand::Start, PerfusionCommand::Pause][..],
    ] {
        let (mut machine, motor, pin, mut sink) = make_machine();
        for cmd in setup {
            let result = match cmd {
                PerfusionCommand::Start => machine.start_perfusion(&mut sink),
                PerfusionCommand::Pause => machine.pause_perfusion(&mut sink),
                _ => unreachable!(),
            };
            result.unwrap();
        }
        machine.end_perfusion(&mut sink).unwrap();
        assert_eq!(machine.state(), PerfusionState::Idle);
        assert!(!motor.is_enabled());
        assert!(!pin.is_high());
    }
}

#[test]
fn drain_policy_leaves_valve_open_after_end() {
    let mut config = PerfusionConfig::default();
    config.end_valve_policy = EndValvePolicy::DrainOpen;
    let (mut machine, _motor, pin, mut sink) = make_machine_with(config);
    machine.set_current_pressure(0.0);
    machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Closed);
    machine.end_perfusion(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Open);
    assert!(pin.is_high());

    // Stays open while idle.
    machine.tick(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Open);
}

#[test]
fn reaching_travel_limit_ends_the_run_on_next_tick() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    machine.set_travel_position(250);
    machine.set_end_position(200).unwrap();
    assert_eq!(
        machine.state(),
        PerfusionState::Perfusing,
        "setting the end position alone does not end the run"
    );
    machine.tick(&mut sink).unwrap();
    assert_eq!(machine.state(), PerfusionState::Idle);
    assert!(!motor.is_enabled());
}

// ── Ignored commands ──────────────────────────────────────────

#[test]
fn wrong_state_commands_emit_command_ignored() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    let calls = motor.call_count();
    assert_eq!(machine.pause_perfusion(&mut sink).unwrap(), Disposition::Ignored);
    assert_eq!(machine.continue_perfusion(&mut sink).unwrap(), Disposition::Ignored);
    assert_eq!(motor.call_count(), calls);
    assert!(sink.events.contains(&AppEvent::CommandIgnored {
        command: PerfusionCommand::Pause,
        state: PerfusionState::Idle,
    }));

    machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(machine.start_perfusion(&mut sink).unwrap(), Disposition::Ignored);
    assert_eq!(machine.state(), PerfusionState::Perfusing);
}

// ── Maintenance overrides ─────────────────────────────────────

#[test]
fn maintenance_open_holds_while_idle() {
    let (mut machine, _motor, pin, mut sink) = make_machine();
    machine.open_valve(&mut sink).unwrap();
    for _ in 0..5 {
        machine.tick(&mut sink).unwrap();
    }
    assert!(pin.is_high());
    machine.toggle_valve(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Closed);
}

#[test]
fn end_recloses_valve_opened_during_pause() {
    let (mut machine, _motor, pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    machine.pause_perfusion(&mut sink).unwrap();
    machine.open_valve(&mut sink).unwrap();
    assert!(pin.is_high());
    machine.end_perfusion(&mut sink).unwrap();
    assert!(!pin.is_high());
}

// ── Priming ───────────────────────────────────────────────────

#[test]
fn rpm_command_applies_immediately_while_perfusing() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    machine.set_motor_speed_rpm(1.5, &mut sink).unwrap();
    assert!(!motor.is_enabled());
    machine.start_perfusion(&mut sink).unwrap();
    assert!((motor.velocity() + 150.0).abs() < 1e-3);
    machine.set_motor_speed_rpm(0.0, &mut sink).unwrap();
    assert!((motor.velocity() + floor_velocity()).abs() < 1e-4);
}

// ── Hardware failure ──────────────────────────────────────────

#[test]
fn failed_motor_write_keeps_state_and_retries_on_tick() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    motor.fail_next.set(true);
    let err = machine.start_perfusion(&mut sink).unwrap_err();
    assert_eq!(err, Error::Actuator(ActuatorError::DriverCommandFailed));
    assert_eq!(machine.state(), PerfusionState::Perfusing);
    assert!(!motor.is_enabled());

    machine.tick(&mut sink).unwrap();
    assert!(motor.is_enabled());
    assert!((motor.velocity() + floor_velocity()).abs() < 1e-4);
}

#[test]
fn failed_motor_write_still_closes_valve_on_pause() {
    let (mut machine, motor, pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    assert_eq!(machine.valve_state(), ValveState::Open);

    motor.fail_next.set(true);
    let err = machine.pause_perfusion(&mut sink).unwrap_err();
    assert_eq!(err, Error::Actuator(ActuatorError::DriverCommandFailed));
    assert_eq!(machine.state(), PerfusionState::Paused);
    assert_eq!(machine.valve_state(), ValveState::Closed);
    assert!(!pin.is_high());
    assert!(sink.events.contains(&AppEvent::ValveChanged(ValveState::Closed)));
    assert!(motor.is_enabled(), "disable has not gone through yet");

    machine.tick(&mut sink).unwrap();
    assert!(!motor.is_enabled());
    assert_eq!(motor.velocity(), 0.0);
}

// ── Setting validation ────────────────────────────────────────

#[test]
fn non_finite_flow_rate_is_rejected() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    machine.start_perfusion(&mut sink).unwrap();
    let before = machine.config().flow_rate;
    let calls = motor.call_count();

    for rate in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        assert!(matches!(
            machine.set_flow_rate(rate, &mut sink),
            Err(Error::Config(_))
        ));
    }
    assert_eq!(machine.config().flow_rate, before);
    assert_eq!(motor.call_count(), calls, "motor is not re-commanded");
    assert!((motor.velocity() + floor_velocity()).abs() < 1e-4);
}

#[test]
fn negative_end_position_is_rejected() {
    let (mut machine, _motor, _pin, mut sink) = make_machine();
    machine.set_end_position(300).unwrap();
    assert!(matches!(machine.set_end_position(-1), Err(Error::Config(_))));
    assert!(matches!(
        machine.handle_command(AppCommand::SetEndPosition(-50), &mut sink),
        Err(Error::Config(_))
    ));
    assert_eq!(machine.end_position(), 300);

    machine.set_end_position(0).unwrap();
    assert_eq!(machine.end_position(), 0);
}

// ── Packets ───────────────────────────────────────────────────

#[test]
fn dashboard_packet_drives_the_machine() {
    let (mut machine, motor, _pin, mut sink) = make_machine();
    for cmd in parse_packet("START_PERFUSION,4.0,2.5").unwrap() {
        machine.handle_command(cmd, &mut sink).unwrap();
    }
    assert_eq!(machine.state(), PerfusionState::Perfusing);
    assert!((machine.target_pressure() - 4.0).abs() < f32::EPSILON);
    assert!((machine.flow_rate() - 2.5).abs() < f32::EPSILON);
    let expected = -2.5 * FlowCalibration::UART_DRIVER_REV2.gain;
    assert!((motor.velocity() - expected).abs() < 1e-3);
    assert_eq!(machine.valve_state(), ValveState::Closed);

    machine.handle_command(AppCommand::SetEndPosition(10), &mut sink).unwrap();
    machine.handle_command(AppCommand::SetTravelPosition(10), &mut sink).unwrap();
    machine.tick(&mut sink).unwrap();
    assert_eq!(machine.state(), PerfusionState::Idle);
}

// ── Status ────────────────────────────────────────────────────

#[test]
fn status_line_matches_telemetry_layout() {
    let (mut machine, _motor, _pin, mut sink) = make_machine();
    machine.update_telemetry("x,y,3.0,0.25,1,2,3,9.5,CW,r,");
    machine.record_encoder(12.0, MotorDirection::CounterClockWise);
    machine.start_perfusion(&mut sink).unwrap();
    let line = machine.status_report().to_line().unwrap();
    assert!(line.starts_with("PERFUSING,OPEN,3.00,0.25,1.00,2.00,3.00,12.00,CCW,-8.089,"));
    // The reported motor state from the sensor board is kept separately.
    assert_eq!(machine.telemetry().reported_motor_direction, MotorDirection::ClockWise);
}
