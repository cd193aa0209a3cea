//! Pressure-gated pinch valve.
//!
//! The valve opens to relieve back-pressure while a run is active and is
//! otherwise held closed.  There is no hysteresis band: a pressure hovering
//! at the target will chatter at the control-loop rate.
//!
//! The GPIO is written only when the commanded state changes, so calling
//! [`ValveController::evaluate`] every tick costs nothing on the bus.

use embedded_hal::digital::OutputPin;
use log::debug;

use crate::error::ActuatorError;
use crate::fsm::context::ValveState;

/// Threshold policy: open iff pressure exceeds the target during a run.
pub fn valve_policy(current: f32, target: f32, is_perfusing: bool) -> ValveState {
    if is_perfusing && current > target {
        ValveState::Open
    } else {
        ValveState::Closed
    }
}

/// Binary valve on a single GPIO with configurable polarity.
pub struct ValveController<P: OutputPin> {
    pin: P,
    active_high: bool,
    state: ValveState,
}

impl<P: OutputPin> ValveController<P> {
    /// Take ownership of the pin and drive the valve closed.
    pub fn new(pin: P, active_high: bool) -> Result<Self, ActuatorError> {
        let mut valve = Self {
            pin,
            active_high,
            state: ValveState::Closed,
        };
        valve.write(ValveState::Closed)?;
        Ok(valve)
    }

    /// Apply the threshold policy.  Idempotent.
    pub fn evaluate(
        &mut self,
        current: f32,
        target: f32,
        is_perfusing: bool,
    ) -> Result<ValveState, ActuatorError> {
        self.drive(valve_policy(current, target, is_perfusing))?;
        Ok(self.state)
    }

    /// Open regardless of pressure, until the next `evaluate`.
    pub fn force_open(&mut self) -> Result<(), ActuatorError> {
        self.drive(ValveState::Open)
    }

    /// Close regardless of pressure, until the next `evaluate`.
    pub fn force_close(&mut self) -> Result<(), ActuatorError> {
        self.drive(ValveState::Closed)
    }

    /// Flip the valve (maintenance).
    pub fn toggle(&mut self) -> Result<ValveState, ActuatorError> {
        let next = match self.state {
            ValveState::Open => ValveState::Closed,
            ValveState::Closed => ValveState::Open,
        };
        self.drive(next)?;
        Ok(self.state)
    }

    pub fn state(&self) -> ValveState {
        self.state
    }

    /// Release the pin.
    pub fn free(self) -> P {
        self.pin
    }

    fn drive(&mut self, next: ValveState) -> Result<(), ActuatorError> {
        if next == self.state {
            return Ok(());
        }
        self.write(next)?;
        debug!("valve {} -> {}", self.state.label(), next.label());
        self.state = next;
        Ok(())
    }

    fn write(&mut self, state: ValveState) -> Result<(), ActuatorError> {
        let high = (state == ValveState::Open) == self.active_high;
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|_| ActuatorError::GpioWriteFailed)
    }
}
