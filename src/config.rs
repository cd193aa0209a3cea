//! System configuration parameters
//!
//! All tunable parameters for the perfusion controller: pressure target,
//! flow calibration for the installed syringe/driver combination, valve
//! wiring and travel limits.  The host runner can load these from a JSON
//! file; on the device they come from `Default`.

use core::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::fsm::context::MotorDirection;

/// Which motor backend drives the syringe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Plain step/dir stepper driver with an active-low enable pin.
    StepDir,
    /// UART-addressed driver chip with an internal velocity generator.
    UartDriver,
}

/// What the valve does when a perfusion run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndValvePolicy {
    /// Drive the valve closed.
    Close,
    /// Leave the valve open so the line drains.
    DrainOpen,
}

/// Flow-rate → motor-velocity calibration.
///
/// `gain` converts the user-facing flow rate into the backend's native
/// velocity unit; `flow_floor` is the smallest rate the driver can deliver
/// without stalling between microsteps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowCalibration {
    pub gain: f32,
    pub flow_floor: f32,
}

impl FlowCalibration {
    /// Step/dir stepper with a 10 mL syringe.  Velocity in steps/s, floor 1.7 steps/s.
    pub const STEP_DIR_10ML: Self = Self {
        gain: 0.588_24,
        flow_floor: 1.7 / 0.588_24,
    };

    /// UART driver, first plumbing revision.  Flow in mL/day, floor 0.1 mL/day.
    pub const UART_DRIVER_REV1: Self = Self {
        gain: 65.773_636,
        flow_floor: 0.1,
    };

    /// UART driver, current plumbing revision.  Flow in mL/day, floor 0.1 mL/day.
    pub const UART_DRIVER_REV2: Self = Self {
        gain: 80.890_96,
        flow_floor: 0.1,
    };

    /// Derive the gain from the mechanical parameters of the pump.
    pub fn from_geometry(geometry: &SyringeGeometry, flow_floor: f32) -> Self {
        Self {
            gain: geometry.velocity_per_flow_unit(),
            flow_floor,
        }
    }

    /// Velocity substituted for any request below the floor.
    pub fn floor_velocity(&self) -> f32 {
        self.gain * self.flow_floor
    }
}

/// Mechanical description of the syringe drive train.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyringeGeometry {
    /// Inner bore of the syringe barrel (mm).
    pub bore_mm: f32,
    /// Plunger travel per motor revolution (mm).
    pub lead_mm_per_rev: f32,
    pub full_steps_per_rev: u16,
    pub microsteps: u16,
    /// Microsteps per second represented by one unit of the driver's velocity
    /// command (1.0 for step/dir, 0.715 for the UART driver's internal generator).
    pub velocity_unit_hz: f32,
    /// Seconds in one flow-rate time unit (86 400 for mL/day).
    pub seconds_per_flow_unit: f32,
}

impl SyringeGeometry {
    /// Dispensed volume per millimetre of plunger travel (mL/mm).
    pub fn ml_per_mm(&self) -> f32 {
        let radius = self.bore_mm / 2.0;
        PI * radius * radius / 1000.0
    }

    /// Microsteps needed to dispense one millilitre.
    pub fn microsteps_per_ml(&self) -> f32 {
        let microsteps_per_rev = f32::from(self.full_steps_per_rev) * f32::from(self.microsteps);
        microsteps_per_rev / (self.lead_mm_per_rev * self.ml_per_mm())
    }

    /// Driver velocity units per unit of flow rate.
    pub fn velocity_per_flow_unit(&self) -> f32 {
        self.microsteps_per_ml() / self.seconds_per_flow_unit / self.velocity_unit_hz
    }
}

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfusionConfig {
    // --- Pressure ---
    /// Back-pressure above which the valve opens (mmHg).
    pub target_pressure_mmhg: f32,

    // --- Flow ---
    /// Requested flow rate at boot (calibration units, usually mL/day).
    pub flow_rate: f32,
    pub flow: FlowCalibration,
    pub backend: BackendKind,

    // --- Travel ---
    /// Travel limit of the syringe; 0 means no limit configured.
    pub end_position: i32,
    /// Rotation that pushes the plunger forward.
    pub perfusion_direction: MotorDirection,

    // --- Valve ---
    /// `true` when a HIGH level on the valve pin opens the valve.
    pub valve_active_high: bool,
    pub end_valve_policy: EndValvePolicy,

    // --- Motor ---
    /// Full steps per revolution; used by both backends.
    pub stepper_steps_per_rev: u16,

    // --- Step/dir backend ---
    pub stepper_microsteps: u16,

    // --- UART driver backend ---
    /// Run current as a percentage of the driver's full scale.
    pub driver_run_current_percent: u8,
    pub driver_microsteps: u16,

    // --- Timing ---
    /// Control loop interval (milliseconds)
    pub control_loop_interval_ms: u32,
    /// Status line interval (milliseconds)
    pub status_interval_ms: u32,
}

impl Default for PerfusionConfig {
    fn default() -> Self {
        Self::for_backend(BackendKind::UartDriver)
    }
}

impl PerfusionConfig {
    /// Defaults with the flow calibration that matches `backend`.
    pub fn for_backend(backend: BackendKind) -> Self {
        let flow = match backend {
            BackendKind::StepDir => FlowCalibration::STEP_DIR_10ML,
            BackendKind::UartDriver => FlowCalibration::UART_DRIVER_REV2,
        };
        Self {
            target_pressure_mmhg: 1.0,

            flow_rate: 0.0,
            flow,
            backend,

            end_position: 0,
            perfusion_direction: MotorDirection::CounterClockWise,

            valve_active_high: true,
            end_valve_policy: EndValvePolicy::Close,

            stepper_steps_per_rev: 200,
            stepper_microsteps: 64,

            driver_run_current_percent: 60,
            driver_microsteps: 256,

            control_loop_interval_ms: 100,  // 10 Hz
            status_interval_ms: 1000,       // 1 Hz
        }
    }

    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_pressure_mmhg.is_finite() || self.target_pressure_mmhg < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "target_pressure_mmhg must be finite and >= 0",
            ));
        }
        if !self.flow_rate.is_finite() {
            return Err(ConfigError::ValidationFailed("flow_rate must be finite"));
        }
        if !self.flow.gain.is_finite() || self.flow.gain <= 0.0 {
            return Err(ConfigError::ValidationFailed("flow.gain must be > 0"));
        }
        if !self.flow.flow_floor.is_finite() || self.flow.flow_floor <= 0.0 {
            return Err(ConfigError::ValidationFailed("flow.flow_floor must be > 0"));
        }
        if self.perfusion_direction == MotorDirection::Stop {
            return Err(ConfigError::ValidationFailed(
                "perfusion_direction must be a rotation",
            ));
        }
        if self.end_position < 0 {
            return Err(ConfigError::ValidationFailed("end_position must be >= 0"));
        }
        if self.stepper_steps_per_rev == 0 {
            return Err(ConfigError::ValidationFailed("stepper_steps_per_rev must be > 0"));
        }
        if !valid_microsteps(self.stepper_microsteps) || !valid_microsteps(self.driver_microsteps) {
            return Err(ConfigError::ValidationFailed(
                "microsteps must be a power of two in 1..=256",
            ));
        }
        if self.driver_run_current_percent == 0 || self.driver_run_current_percent > 100 {
            return Err(ConfigError::ValidationFailed(
                "driver_run_current_percent must be 1..=100",
            ));
        }
        if self.control_loop_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("control_loop_interval_ms must be > 0"));
        }
        if self.status_interval_ms < self.control_loop_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "status_interval_ms must not be shorter than the control loop",
            ));
        }
        Ok(())
    }
}

fn valid_microsteps(m: u16) -> bool {
    m.is_power_of_two() && m <= 256
}
