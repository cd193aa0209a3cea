//! Flow-rate to motor-velocity conversion.
//!
//! A syringe pump delivers volume in proportion to plunger travel, so the
//! conversion is a single gain.  Below the calibrated floor the driver
//! stalls between microsteps; such requests run at the floor velocity
//! instead of stopping.

use crate::config::FlowCalibration;

/// Pure flow → velocity mapping for one calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowConverter {
    calibration: FlowCalibration,
}

impl FlowConverter {
    pub fn new(calibration: FlowCalibration) -> Self {
        Self { calibration }
    }

    /// Velocity for `desired` flow.  NaN, negative and sub-floor requests
    /// map to the floor velocity.
    pub fn to_velocity(&self, desired: f32) -> f32 {
        if desired >= self.calibration.flow_floor {
            desired * self.calibration.gain
        } else {
            self.floor_velocity()
        }
    }

    pub fn floor_velocity(&self) -> f32 {
        self.calibration.floor_velocity()
    }

    /// The flow rate actually delivered for a `desired` request.
    pub fn effective_flow_rate(&self, desired: f32) -> f32 {
        if desired >= self.calibration.flow_floor {
            desired
        } else {
            self.calibration.flow_floor
        }
    }

    pub fn calibration(&self) -> FlowCalibration {
        self.calibration
    }
}
