//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the single struct that state handlers read from and
//! write to.  It contains the latest telemetry, the actuator commands the
//! orchestrator must apply, travel tracking, and configuration.

use serde::{Deserialize, Serialize};

use crate::config::PerfusionConfig;
use crate::telemetry::TelemetrySample;

// ---------------------------------------------------------------------------
// Motor direction and valve state
// ---------------------------------------------------------------------------

/// Rotation of the syringe motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotorDirection {
    #[default]
    Stop,
    ClockWise,
    CounterClockWise,
}

impl MotorDirection {
    /// Decode the wire label.  Anything other than `CW` / `CCW` is `Stop`.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "CW" => Self::ClockWise,
            "CCW" => Self::CounterClockWise,
            _ => Self::Stop,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::ClockWise => "CW",
            Self::CounterClockWise => "CCW",
        }
    }

    /// Direction implied by a signed velocity (positive = clockwise).
    pub fn from_velocity(velocity: f32) -> Self {
        if velocity > 0.0 {
            Self::ClockWise
        } else if velocity < 0.0 {
            Self::CounterClockWise
        } else {
            Self::Stop
        }
    }

    /// Sign applied to a velocity magnitude to rotate this way.
    pub fn sign(self) -> f32 {
        match self {
            Self::Stop => 0.0,
            Self::ClockWise => 1.0,
            Self::CounterClockWise => -1.0,
        }
    }
}

/// Binary valve position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValveState {
    #[default]
    Closed,
    Open,
}

impl ValveState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator commands (written by state handlers; applied by the orchestrator)
// ---------------------------------------------------------------------------

/// What the motor backend should be doing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    /// Driver disabled, zero velocity.
    Stopped,
    /// Driver enabled at a signed velocity (positive = clockwise).
    Run { velocity: f32 },
}

/// How the valve should be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveCommand {
    /// Follow the pressure threshold policy.
    Evaluate,
    Close,
    Open,
}

/// Commands that state handlers write to request actuator actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCommands {
    pub motor: MotorCommand,
    pub valve: ValveCommand,
}

impl Default for ActuatorCommands {
    fn default() -> Self {
        Self::all_off()
    }
}

impl ActuatorCommands {
    /// Motor stopped, valve closed: safe default.
    pub fn all_off() -> Self {
        Self {
            motor: MotorCommand::Stopped,
            valve: ValveCommand::Close,
        }
    }
}

// ---------------------------------------------------------------------------
// FsmContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct FsmContext {
    // -- Inputs --
    /// Latest parsed telemetry.
    pub telemetry: TelemetrySample,
    /// Current syringe travel, in the same units as `config.end_position`.
    pub travel_position: i32,

    // -- Motion --
    /// Floor-clamped velocity magnitude derived from the configured flow rate.
    pub flow_velocity: f32,
    /// Direct velocity magnitude set for priming; takes precedence over the flow velocity.
    pub speed_override: Option<f32>,

    // -- Outputs --
    pub commands: ActuatorCommands,
    /// Set by handlers when a run finishes, so `Idle` applies the end-of-run valve policy.
    pub run_ended: bool,

    // -- Configuration --
    pub config: PerfusionConfig,
}

impl FsmContext {
    /// Create a new context with the given configuration and initial flow velocity.
    pub fn new(config: PerfusionConfig, flow_velocity: f32) -> Self {
        let telemetry = TelemetrySample {
            current_pressure: 2.0,
            ..TelemetrySample::default()
        };
        Self {
            telemetry,
            travel_position: 0,
            flow_velocity,
            speed_override: None,
            commands: ActuatorCommands::all_off(),
            run_ended: false,
            config,
        }
    }

    /// True once the syringe has reached its configured travel limit.
    pub fn end_reached(&self) -> bool {
        self.config.end_position != 0 && self.travel_position >= self.config.end_position
    }

    /// Signed velocity for a perfusion run in the configured direction.
    pub fn perfusion_velocity(&self) -> f32 {
        let magnitude = self.speed_override.unwrap_or(self.flow_velocity);
        magnitude * self.config.perfusion_direction.sign()
    }

    /// Direction implied by the current motor command.
    pub fn commanded_direction(&self) -> MotorDirection {
        match self.commands.motor {
            MotorCommand::Stopped => MotorDirection::Stop,
            MotorCommand::Run { velocity } => MotorDirection::from_velocity(velocity),
        }
    }
}
