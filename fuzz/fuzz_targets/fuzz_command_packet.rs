//! Fuzz target: dashboard packets into the state machine
//!
//! Decodes arbitrary text with `parse_packet` and drives every decoded
//! command through a `PerfusionStateMachine` backed by inert hardware.
//! Checks that nothing panics and that the motor only runs while the
//! machine is perfusing.
//!
//! cargo fuzz run fuzz_command_packet

#![no_main]

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};
use libfuzzer_sys::fuzz_target;
use perfusion::app::commands::parse_packet;
use perfusion::app::events::AppEvent;
use perfusion::app::ports::{EventSink, MotorBackend};
use perfusion::app::service::PerfusionStateMachine;
use perfusion::config::PerfusionConfig;
use perfusion::error::ActuatorError;
use perfusion::fsm::PerfusionState;

#[derive(Default)]
struct InertMotor {
    enabled: bool,
}

impl MotorBackend for InertMotor {
    fn enable(&mut self) -> Result<(), ActuatorError> {
        self.enabled = true;
        Ok(())
    }
    fn disable(&mut self) -> Result<(), ActuatorError> {
        self.enabled = false;
        Ok(())
    }
    fn set_velocity(&mut self, _velocity: f32) -> Result<(), ActuatorError> {
        Ok(())
    }
    fn velocity_for_rpm(&self, rpm: f32) -> f32 {
        rpm
    }
}

struct InertPin;

impl ErrorType for InertPin {
    type Error = Infallible;
}

impl OutputPin for InertPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _event: &AppEvent) {}
}

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let Ok(mut machine) =
        PerfusionStateMachine::new(PerfusionConfig::default(), InertMotor::default(), InertPin)
    else {
        return;
    };
    let mut sink = Discard;
    if machine.boot(&mut sink).is_err() {
        return;
    }

    for line in text.lines() {
        if let Some(commands) = parse_packet(line) {
            for cmd in commands {
                let _ = machine.handle_command(cmd, &mut sink);
            }
        } else {
            machine.update_telemetry(line);
        }
        let _ = machine.tick(&mut sink);

        let perfusing = machine.state() == PerfusionState::Perfusing;
        assert_eq!(machine.motor().enabled, perfusing);
    }
});
