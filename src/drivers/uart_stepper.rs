//! UART-addressed stepper driver backend (TMC2209-class).
//!
//! The chip has an internal velocity generator: velocity commands are
//! written as a signed register value and the chip produces the steps.
//! One register unit is 0.715 microsteps/s with the internal oscillator.

use log::info;

use crate::app::ports::{MotorBackend, StepperDriverBus};
use crate::error::ActuatorError;

/// Microsteps per second represented by one velocity register unit.
pub const VELOCITY_UNIT_HZ: f32 = 0.715;

/// The velocity register is 24-bit signed.
const VACTUAL_MAX: i32 = (1 << 23) - 1;

pub struct UartStepper<B> {
    bus: B,
    full_steps_per_rev: u16,
    run_current_percent: u8,
    microsteps: u16,
    enabled: bool,
    velocity: i32,
}

impl<B: StepperDriverBus> UartStepper<B> {
    pub fn new(bus: B, full_steps_per_rev: u16, run_current_percent: u8, microsteps: u16) -> Self {
        Self {
            bus,
            full_steps_per_rev,
            run_current_percent,
            microsteps,
            enabled: false,
            velocity: 0,
        }
    }

    /// Configure the chip: run current, CoolStep, enable, microstepping.
    pub fn begin(&mut self) -> Result<(), ActuatorError> {
        self.bus.set_run_current(self.run_current_percent)?;
        self.bus.set_cool_step(true)?;
        self.bus.set_enabled(true)?;
        self.enabled = true;
        self.bus.set_microsteps(self.microsteps)?;
        info!(
            "uart stepper: {}% run current, 1/{} microstepping",
            self.run_current_percent, self.microsteps
        );
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last register value written.
    pub fn velocity_register(&self) -> i32 {
        self.velocity
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B: StepperDriverBus> MotorBackend for UartStepper<B> {
    fn enable(&mut self) -> Result<(), ActuatorError> {
        self.bus.set_enabled(true)?;
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ActuatorError> {
        self.bus.set_enabled(false)?;
        self.enabled = false;
        self.bus.move_at_velocity(0)?;
        self.velocity = 0;
        Ok(())
    }

    fn set_velocity(&mut self, velocity: f32) -> Result<(), ActuatorError> {
        let register = if velocity.is_finite() {
            (velocity.round() as i32).clamp(-VACTUAL_MAX, VACTUAL_MAX)
        } else {
            0
        };
        self.bus.move_at_velocity(register)?;
        self.velocity = register;
        Ok(())
    }

    fn velocity_for_rpm(&self, rpm: f32) -> f32 {
        let microsteps_per_rev = f32::from(self.full_steps_per_rev) * f32::from(self.microsteps);
        rpm * microsteps_per_rev / (60.0 * VELOCITY_UNIT_HZ)
    }
}
