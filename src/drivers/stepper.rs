//! Step/dir stepper backend.
//!
//! Two GPIOs (active-low enable, direction) plus a hardware timer that
//! generates the step pulse train.  Velocity is in steps per second;
//! positive velocity drives the direction pin high (clockwise).
//!
//! ## Dual-target design
//!
//! On the device the timer is an LEDC / MCPWM channel; on the host the
//! simulated timer from [`crate::adapters::sim`] records the rate.

use embedded_hal::digital::OutputPin;
use log::debug;

use crate::app::ports::{MotorBackend, StepPulseTimer};
use crate::error::ActuatorError;

pub struct StepDirStepper<EN, DIR, T> {
    enable_pin: EN,
    dir_pin: DIR,
    timer: T,
    steps_per_rev: u32,
    enabled: bool,
    velocity: f32,
}

impl<EN, DIR, T> StepDirStepper<EN, DIR, T>
where
    EN: OutputPin,
    DIR: OutputPin,
    T: StepPulseTimer,
{
    /// Build the backend and leave the driver disabled.
    pub fn new(
        enable_pin: EN,
        dir_pin: DIR,
        timer: T,
        full_steps_per_rev: u16,
        microsteps: u16,
    ) -> Result<Self, ActuatorError> {
        let mut stepper = Self {
            enable_pin,
            dir_pin,
            timer,
            steps_per_rev: u32::from(full_steps_per_rev) * u32::from(microsteps),
            enabled: true,
            velocity: 0.0,
        };
        stepper.disable()?;
        Ok(stepper)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last commanded signed velocity (steps/s).
    pub fn velocity(&self) -> f32 {
        self.velocity
    }
}

impl<EN, DIR, T> MotorBackend for StepDirStepper<EN, DIR, T>
where
    EN: OutputPin,
    DIR: OutputPin,
    T: StepPulseTimer,
{
    fn enable(&mut self) -> Result<(), ActuatorError> {
        self.enable_pin
            .set_low()
            .map_err(|_| ActuatorError::GpioWriteFailed)?;
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ActuatorError> {
        self.timer.set_rate_hz(0.0)?;
        self.velocity = 0.0;
        self.enable_pin
            .set_high()
            .map_err(|_| ActuatorError::GpioWriteFailed)?;
        self.enabled = false;
        Ok(())
    }

    fn set_velocity(&mut self, velocity: f32) -> Result<(), ActuatorError> {
        let dir = if velocity >= 0.0 {
            self.dir_pin.set_high()
        } else {
            self.dir_pin.set_low()
        };
        dir.map_err(|_| ActuatorError::GpioWriteFailed)?;
        self.timer.set_rate_hz(velocity.abs())?;
        self.velocity = velocity;
        debug!("step/dir: {:.3} steps/s", velocity);
        Ok(())
    }

    fn velocity_for_rpm(&self, rpm: f32) -> f32 {
        rpm * self.steps_per_rev as f32 / 60.0
    }
}
