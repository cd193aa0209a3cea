//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ PerfusionStateMachine (domain)
//! ```
//!
//! Driven adapters (motor drivers, angle sensor, event sinks, config
//! storage) implement these traits.  The
//! [`PerfusionStateMachine`](super::service::PerfusionStateMachine) consumes
//! them via generics, so the domain core never touches hardware directly.
//! The valve is driven through `embedded_hal::digital::OutputPin` and needs
//! no port of its own.

use crate::config::PerfusionConfig;
use crate::error::{ActuatorError, EncoderError};

// ───────────────────────────────────────────────────────────────
// Motor backend port (driven adapter: domain → syringe drive)
// ───────────────────────────────────────────────────────────────

/// Enable/disable and velocity primitives shared by every syringe drive.
pub trait MotorBackend {
    /// Energise the driver.
    fn enable(&mut self) -> Result<(), ActuatorError>;

    /// De-energise the driver and command zero velocity.
    fn disable(&mut self) -> Result<(), ActuatorError>;

    /// Command a signed velocity in the backend's native unit
    /// (positive = clockwise).
    fn set_velocity(&mut self, velocity: f32) -> Result<(), ActuatorError>;

    /// Convert a shaft speed in RPM into the backend's native velocity unit.
    fn velocity_for_rpm(&self, rpm: f32) -> f32;
}

// ───────────────────────────────────────────────────────────────
// Angle sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Raw access to a 14-bit absolute magnetic angle sensor.
pub trait AngleSensor {
    /// Read the 16-bit angle register (bits 0–13 angle, bit 14 error flag).
    fn read_angle_word(&mut self) -> Result<u16, EncoderError>;
}

// ───────────────────────────────────────────────────────────────
// Step generator and driver-chip ports (used by the motor adapters)
// ───────────────────────────────────────────────────────────────

/// Hardware timer producing step pulses for a step/dir driver.
pub trait StepPulseTimer {
    /// Set the pulse rate; 0 stops pulse generation.
    fn set_rate_hz(&mut self, hz: f32) -> Result<(), ActuatorError>;
}

/// Register-level access to a UART-addressed stepper driver chip.
pub trait StepperDriverBus {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), ActuatorError>;

    /// Drive the chip's internal velocity generator (signed, chip units).
    fn move_at_velocity(&mut self, velocity: i32) -> Result<(), ActuatorError>;

    /// Run current as a percentage of full scale.
    fn set_run_current(&mut self, percent: u8) -> Result<(), ActuatorError>;

    fn set_microsteps(&mut self, microsteps: u16) -> Result<(), ActuatorError>;

    /// Load-adaptive current reduction.
    fn set_cool_step(&mut self, enabled: bool) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log, host
/// dashboard, test recorder).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the perfusion configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration.  Returns [`ConfigError::NotFound`] if none is stored.
    fn load(&self) -> Result<PerfusionConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &PerfusionConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No stored config.
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::NotFound => Self::Config("not found"),
            ConfigError::Corrupted => Self::Config("corrupted"),
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::IoError => Self::Config("I/O error"),
        }
    }
}
