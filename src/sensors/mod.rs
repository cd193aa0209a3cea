//! Sensor subsystem.
//!
//! Only the rotary encoder is sampled by the firmware itself; pressure,
//! tilt and gyro values arrive as telemetry lines (see [`crate::telemetry`]).

pub mod encoder;

pub use encoder::{EncoderSample, EncoderTracker, SharedEncoderTracker};
