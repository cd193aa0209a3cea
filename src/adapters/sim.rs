//! Simulated bench hardware for the host runner.
//!
//! Every simulated part shares one [`SimShaft`]: motor adapters set its
//! speed, the angle sensor reads its position.  Time comes from the real
//! monotonic clock so the encoder sees realistic intervals.
//!
//! | Part             | Implements         |
//! |------------------|--------------------|
//! | `SimPin`         | `OutputPin`        |
//! | `SimStepTimer`   | `StepPulseTimer`   |
//! | `SimDriverBus`   | `StepperDriverBus` |
//! | `SimAngleSensor` | `AngleSensor`      |

use core::cell::Cell;
use core::convert::Infallible;
use std::rc::Rc;
use std::time::Instant;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::app::ports::{AngleSensor, StepPulseTimer, StepperDriverBus};
use crate::drivers::uart_stepper::VELOCITY_UNIT_HZ;
use crate::error::{ActuatorError, EncoderError};
use crate::sensors::encoder::{ANGLE_MASK, COUNTS_PER_REV};

/// Shaft state shared by the simulated motor and encoder.
#[derive(Debug)]
pub struct SimShaft {
    rpm: Cell<f32>,
    revolutions: Cell<f64>,
    last: Cell<Instant>,
}

impl SimShaft {
    /// A stationary shaft, shared by the parts attached to it.
    pub fn shared() -> Rc<Self> {
        Rc::new(Self {
            rpm: Cell::new(0.0),
            revolutions: Cell::new(0.0),
            last: Cell::new(Instant::now()),
        })
    }

    /// Signed shaft speed (positive = clockwise).
    pub fn rpm(&self) -> f32 {
        self.rpm.get()
    }

    pub fn set_rpm(&self, rpm: f32) {
        self.advance();
        self.rpm.set(rpm);
    }

    /// Integrated position in revolutions.
    pub fn revolutions(&self) -> f64 {
        self.advance();
        self.revolutions.get()
    }

    fn advance(&self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last.get()).as_secs_f64();
        self.last.set(now);
        let revs = self.revolutions.get() + f64::from(self.rpm.get()) / 60.0 * dt;
        self.revolutions.set(revs);
    }
}

// ── GPIO ──────────────────────────────────────────────────────

/// Output pin whose level can be observed through a clone.
#[derive(Debug, Clone, Default)]
pub struct SimPin {
    level: Rc<Cell<bool>>,
}

impl SimPin {
    pub fn is_high(&self) -> bool {
        self.level.get()
    }
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.level.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.level.set(true);
        Ok(())
    }
}

// ── Step/dir pulse timer ──────────────────────────────────────

/// Step generator that spins the shaft in the direction of `dir_pin`.
pub struct SimStepTimer {
    shaft: Rc<SimShaft>,
    dir_pin: SimPin,
    steps_per_rev: f32,
}

impl SimStepTimer {
    pub fn new(shaft: Rc<SimShaft>, dir_pin: SimPin, full_steps_per_rev: u16, microsteps: u16) -> Self {
        Self {
            shaft,
            dir_pin,
            steps_per_rev: f32::from(full_steps_per_rev) * f32::from(microsteps),
        }
    }
}

impl StepPulseTimer for SimStepTimer {
    fn set_rate_hz(&mut self, hz: f32) -> Result<(), ActuatorError> {
        let sign = if self.dir_pin.is_high() { 1.0 } else { -1.0 };
        self.shaft.set_rpm(sign * hz * 60.0 / self.steps_per_rev);
        Ok(())
    }
}

// ── UART driver chip ──────────────────────────────────────────

/// Register model of the UART driver chip.
pub struct SimDriverBus {
    shaft: Rc<SimShaft>,
    full_steps_per_rev: u16,
    enabled: bool,
    microsteps: u16,
    velocity: i32,
    run_current_percent: u8,
    cool_step: bool,
}

impl SimDriverBus {
    pub fn new(shaft: Rc<SimShaft>, full_steps_per_rev: u16) -> Self {
        Self {
            shaft,
            full_steps_per_rev,
            enabled: false,
            microsteps: 256,
            velocity: 0,
            run_current_percent: 0,
            cool_step: false,
        }
    }

    pub fn run_current_percent(&self) -> u8 {
        self.run_current_percent
    }

    pub fn cool_step(&self) -> bool {
        self.cool_step
    }

    fn update_shaft(&self) {
        let rpm = if self.enabled {
            let microsteps_per_rev =
                f32::from(self.full_steps_per_rev) * f32::from(self.microsteps);
            self.velocity as f32 * VELOCITY_UNIT_HZ * 60.0 / microsteps_per_rev
        } else {
            0.0
        };
        self.shaft.set_rpm(rpm);
    }
}

impl StepperDriverBus for SimDriverBus {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        self.enabled = enabled;
        self.update_shaft();
        Ok(())
    }

    fn move_at_velocity(&mut self, velocity: i32) -> Result<(), ActuatorError> {
        self.velocity = velocity;
        self.update_shaft();
        Ok(())
    }

    fn set_run_current(&mut self, percent: u8) -> Result<(), ActuatorError> {
        self.run_current_percent = percent;
        Ok(())
    }

    fn set_microsteps(&mut self, microsteps: u16) -> Result<(), ActuatorError> {
        self.microsteps = microsteps;
        self.update_shaft();
        Ok(())
    }

    fn set_cool_step(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        self.cool_step = enabled;
        Ok(())
    }
}

// ── Angle sensor ──────────────────────────────────────────────

/// 14-bit absolute angle of the simulated shaft.
pub struct SimAngleSensor {
    shaft: Rc<SimShaft>,
}

impl SimAngleSensor {
    pub fn new(shaft: Rc<SimShaft>) -> Self {
        Self { shaft }
    }
}

impl AngleSensor for SimAngleSensor {
    fn read_angle_word(&mut self) -> Result<u16, EncoderError> {
        let turn = self.shaft.revolutions().rem_euclid(1.0);
        let counts = (turn * f64::from(COUNTS_PER_REV)) as u16;
        Ok(counts & ANGLE_MASK)
    }
}
