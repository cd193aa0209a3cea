//! Inbound commands to the perfusion state machine.
//!
//! These represent actions requested by the outside world (host dashboard,
//! bench console, travel sensor) that the
//! [`PerfusionStateMachine`](super::service::PerfusionStateMachine)
//! interprets and acts upon.
//!
//! The dashboard sends one packet per button press carrying its whole
//! command history:
//!
//! ```text
//!   CMD[,pressure[,flow]]      e.g.  START_PERFUSION,1.5,2.0
//! ```

use heapless::Vec;
use log::debug;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppCommand {
    Start,
    Pause,
    Continue,
    End,

    /// Valve-opening threshold (mmHg).
    SetTargetPressure(f32),
    /// Override the measured pressure (bench testing without a sensor board).
    SetCurrentPressure(f32),
    /// Requested flow rate in calibration units.
    SetFlowRate(f32),
    /// Syringe travel limit; 0 clears it.
    SetEndPosition(i32),
    /// Current syringe travel.
    SetTravelPosition(i32),
    /// Direct shaft speed for priming, bypassing the flow conversion.
    SetMotorSpeedRpm(f32),

    /// Maintenance overrides.
    OpenValve,
    CloseValve,
    ToggleValve,
}

/// Maximum commands decoded from one packet.
pub const MAX_PACKET_COMMANDS: usize = 3;

/// Decode a dashboard packet.
///
/// Returns `None` when the first field is not a known command word, so the
/// caller can treat the line as telemetry instead.  Setting fields come
/// first in the result so a `START_PERFUSION` in the same packet runs at
/// the new flow rate.  `IDLE` carries settings only.
pub fn parse_packet(line: &str) -> Option<Vec<AppCommand, MAX_PACKET_COMMANDS>> {
    let mut fields = line.trim().split(',').map(str::trim);
    let word = fields.next()?;
    let action = parse_word(word)?;

    let mut out = Vec::new();
    if let Some(p) = fields.next().and_then(parse_setting) {
        // Capacity is MAX_PACKET_COMMANDS; at most three pushes happen.
        let _ = out.push(AppCommand::SetTargetPressure(p));
    }
    if let Some(f) = fields.next().and_then(parse_setting) {
        let _ = out.push(AppCommand::SetFlowRate(f));
    }
    if let Some(cmd) = action {
        let _ = out.push(cmd);
    }
    debug!("packet {:?} -> {:?}", line, out);
    Some(out)
}

/// `Some(None)` for the `IDLE` no-op word.
fn parse_word(word: &str) -> Option<Option<AppCommand>> {
    const WORDS: [(&str, Option<AppCommand>); 8] = [
        ("IDLE", None),
        ("START_PERFUSION", Some(AppCommand::Start)),
        ("PAUSE_PERFUSION", Some(AppCommand::Pause)),
        ("CONTINUE_PERFUSION", Some(AppCommand::Continue)),
        ("END_PERFUSION", Some(AppCommand::End)),
        ("OPEN_VALVE", Some(AppCommand::OpenValve)),
        ("CLOSE_VALVE", Some(AppCommand::CloseValve)),
        ("TOGGLE_VALVE", Some(AppCommand::ToggleValve)),
    ];
    WORDS
        .iter()
        .find(|(w, _)| w.eq_ignore_ascii_case(word))
        .map(|(_, cmd)| *cmd)
}

fn parse_setting(field: &str) -> Option<f32> {
    field.parse::<f32>().ok().filter(|v| v.is_finite())
}
