//! Positional CSV telemetry.
//!
//! Inbound lines come from the sensor board; every field is terminated by a
//! comma and anything after the last comma is an incomplete field:
//!
//! ```text
//!  idx  0     1     2         3     4   5   6   7          8         9
//!       -,    -,    pressure, tilt, gx, gy, gz, motor_rpm, CW|CCW,   reserved,
//! ```
//!
//! The firmware's own status line uses the same layout (state and valve in
//! the two leading slots, commanded velocity in the reserved slot), so a
//! status line fed back through [`TelemetrySample::apply_line`] reproduces
//! the measurements.

use core::fmt::Write;

use heapless::String;
use log::debug;

use crate::fsm::PerfusionState;
use crate::fsm::context::{MotorDirection, ValveState};

/// Number of positional fields in a line.
pub const FIELD_COUNT: usize = 10;

/// Capacity of a formatted status line; fits eight `f32::MAX` fields.
pub const STATUS_LINE_CAPACITY: usize = 400;

/// Auxiliary sensor values, updated field-by-field.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySample {
    pub current_pressure: f32,
    pub tilt: f32,
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
    /// Motor speed as reported by the sensor board (not measured here).
    pub reported_motor_speed: f32,
    pub reported_motor_direction: MotorDirection,
}

impl TelemetrySample {
    /// Merge one telemetry line.  Returns the number of fields consumed.
    ///
    /// Fields that are missing, non-numeric or non-finite keep their
    /// previous value.
    pub fn apply_line(&mut self, line: &str) -> usize {
        let Some((complete, _partial)) = line.rsplit_once(',') else {
            return 0;
        };

        let mut consumed = 0;
        for (idx, part) in complete.split(',').take(FIELD_COUNT).enumerate() {
            consumed += 1;
            let slot = match idx {
                2 => &mut self.current_pressure,
                3 => &mut self.tilt,
                4 => &mut self.gyro_x,
                5 => &mut self.gyro_y,
                6 => &mut self.gyro_z,
                7 => &mut self.reported_motor_speed,
                8 => {
                    self.reported_motor_direction = MotorDirection::from_label(part);
                    continue;
                }
                _ => continue,
            };
            match parse_finite(part) {
                Some(v) => *slot = v,
                None => debug!("telemetry: field {idx} {:?} ignored", part),
            }
        }
        consumed
    }
}

fn parse_finite(part: &str) -> Option<f32> {
    part.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Snapshot rendered as one status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    pub state: PerfusionState,
    pub valve: ValveState,
    pub telemetry: TelemetrySample,
    /// Shaft speed measured by the encoder.
    pub measured_rpm: f32,
    pub measured_direction: MotorDirection,
    /// Signed velocity currently commanded to the backend.
    pub commanded_velocity: f32,
}

impl StatusReport {
    /// `state,valve,pressure,tilt,gx,gy,gz,measured_rpm,measured_dir,velocity,`
    pub fn to_line(&self) -> Result<String<STATUS_LINE_CAPACITY>, core::fmt::Error> {
        let t = &self.telemetry;
        let mut line = String::new();
        write!(
            line,
            "{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{},{:.3},",
            self.state.label(),
            self.valve.label(),
            t.current_pressure,
            t.tilt,
            t.gyro_x,
            t.gyro_y,
            t.gyro_z,
            self.measured_rpm,
            self.measured_direction.label(),
            self.commanded_velocity,
        )?;
        Ok(line)
    }
}
