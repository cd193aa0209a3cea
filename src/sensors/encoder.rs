//! Magnetic rotary encoder tracking (AS5048A-class, 14-bit absolute).
//!
//! The sensor reports an absolute shaft angle.  Speed is derived from the
//! angle change between two polls, corrected for the 16383 → 0 wrap: the
//! shortest signed path between two readings is taken as the true motion,
//! which holds as long as the shaft turns less than half a revolution per
//! poll.
//!
//! Bit 14 of the angle word flags poor magnet field strength.  Such samples
//! are still used; the flag is logged and counted.

use core::cell::RefCell;
use core::f32::consts::TAU;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::warn;

use crate::app::ports::AngleSensor;
use crate::error::EncoderError;
use crate::fsm::context::MotorDirection;

/// Angle counts per shaft revolution.
pub const COUNTS_PER_REV: i32 = 16_384;
/// Half a revolution in counts; the wrap-correction threshold.
pub const HALF_COUNTS: i32 = COUNTS_PER_REV / 2;
/// Angle bits of the register word.
pub const ANGLE_MASK: u16 = 0x3FFF;
/// Magnetic-field error flag.
pub const MAGNETIC_ERROR_BIT: u16 = 0x4000;

/// Signed shortest-path delta between two raw angles, in (−8192, 8192].
pub fn wrap_delta(previous: u16, current: u16) -> i32 {
    let mut delta = i32::from(current) - i32::from(previous);
    if delta > HALF_COUNTS {
        delta -= COUNTS_PER_REV;
    } else if delta <= -HALF_COUNTS {
        delta += COUNTS_PER_REV;
    }
    delta
}

/// Raw 14-bit angle to radians in [0, 2π).
pub fn raw_to_radians(raw: u16) -> f32 {
    f32::from(raw & ANGLE_MASK) * TAU / COUNTS_PER_REV as f32
}

/// One decoded angle reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSample {
    /// Masked to 14 bits.
    pub raw_angle: u16,
    pub angle_rad: f32,
    pub timestamp_us: u64,
    pub magnetic_error: bool,
}

/// Position and speed estimator over an [`AngleSensor`].
pub struct EncoderTracker<S: AngleSensor> {
    sensor: S,
    previous: Option<(u16, u64)>,
    speed_rpm: f32,
    direction: MotorDirection,
    total_counts: i64,
    magnetic_errors: u32,
}

impl<S: AngleSensor> EncoderTracker<S> {
    pub fn new(sensor: S) -> Self {
        Self {
            sensor,
            previous: None,
            speed_rpm: 0.0,
            direction: MotorDirection::Stop,
            total_counts: 0,
            magnetic_errors: 0,
        }
    }

    /// Read the sensor and update speed, direction and position.
    ///
    /// Bus errors leave the tracker untouched; the caller retries next cycle.
    pub fn poll(&mut self, now_us: u64) -> Result<EncoderSample, EncoderError> {
        let word = self.sensor.read_angle_word()?;
        Ok(self.ingest(word, now_us))
    }

    /// Update the tracker from an angle word obtained elsewhere (DMA, ISR).
    pub fn ingest(&mut self, word: u16, now_us: u64) -> EncoderSample {
        let raw = word & ANGLE_MASK;
        let magnetic_error = word & MAGNETIC_ERROR_BIT != 0;
        if magnetic_error {
            self.magnetic_errors = self.magnetic_errors.saturating_add(1);
            warn!("encoder: magnetic field error flagged (raw={raw})");
        }

        if let Some((prev_raw, prev_us)) = self.previous {
            let delta = wrap_delta(prev_raw, raw);
            self.total_counts += i64::from(delta);

            // Zero or negative elapsed time: keep the last speed.
            if now_us > prev_us {
                let elapsed_s = (now_us - prev_us) as f32 / 1_000_000.0;
                let revs = delta as f32 / COUNTS_PER_REV as f32;
                let rpm = revs / elapsed_s * 60.0;
                self.speed_rpm = rpm.abs();
                self.direction = MotorDirection::from_velocity(rpm);
            }
        }
        self.previous = Some((raw, now_us));

        EncoderSample {
            raw_angle: raw,
            angle_rad: raw_to_radians(raw),
            timestamp_us: now_us,
            magnetic_error,
        }
    }

    /// Unsigned shaft speed from the last two polls.
    pub fn speed_rpm(&self) -> f32 {
        self.speed_rpm
    }

    /// Measured rotation from the last two polls.
    pub fn direction(&self) -> MotorDirection {
        self.direction
    }

    /// Signed counts accumulated since construction.
    pub fn total_counts(&self) -> i64 {
        self.total_counts
    }

    pub fn revolutions(&self) -> f32 {
        self.total_counts as f32 / COUNTS_PER_REV as f32
    }

    pub fn magnetic_error_count(&self) -> u32 {
        self.magnetic_errors
    }
}

// ---------------------------------------------------------------------------
// Shared tracker for interrupt / multi-task polling
// ---------------------------------------------------------------------------

/// Measured speed, direction and position, copied out of the shared tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderReading {
    pub speed_rpm: f32,
    pub direction: MotorDirection,
    pub total_counts: i64,
}

/// [`EncoderTracker`] behind a critical-section mutex, so a timer ISR can
/// poll while the control loop reads.
pub struct SharedEncoderTracker<S: AngleSensor> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<EncoderTracker<S>>>,
}

impl<S: AngleSensor> SharedEncoderTracker<S> {
    pub const fn new(tracker: EncoderTracker<S>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(tracker)),
        }
    }

    pub fn poll(&self, now_us: u64) -> Result<EncoderSample, EncoderError> {
        self.inner.lock(|t| t.borrow_mut().poll(now_us))
    }

    pub fn reading(&self) -> EncoderReading {
        self.inner.lock(|t| {
            let t = t.borrow();
            EncoderReading {
                speed_rpm: t.speed_rpm(),
                direction: t.direction(),
                total_counts: t.total_counts(),
            }
        })
    }
}
