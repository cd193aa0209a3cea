//! Fuzz target: `TelemetrySample::apply_line`
//!
//! Feeds arbitrary text as a sensor-board telemetry line and checks that
//! the parser never panics, never consumes more than ten fields, and that
//! the resulting sample always renders into a status line.
//!
//! cargo fuzz run fuzz_telemetry_line

#![no_main]

use libfuzzer_sys::fuzz_target;
use perfusion::fsm::PerfusionState;
use perfusion::fsm::context::{MotorDirection, ValveState};
use perfusion::telemetry::{FIELD_COUNT, StatusReport, TelemetrySample};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };

    let mut sample = TelemetrySample::default();
    let consumed = sample.apply_line(line);
    assert!(consumed <= FIELD_COUNT, "consumed {consumed} fields");

    // Numeric fields are either untouched or finite.
    assert!(sample.current_pressure.is_finite());
    assert!(sample.reported_motor_speed.is_finite());

    let report = StatusReport {
        state: PerfusionState::Perfusing,
        valve: ValveState::Open,
        telemetry: sample,
        measured_rpm: 0.0,
        measured_direction: MotorDirection::Stop,
        commanded_velocity: 0.0,
    };
    assert!(report.to_line().is_ok(), "status line overflowed");
});
