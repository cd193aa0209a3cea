//! Outbound application events.
//!
//! The [`PerfusionStateMachine`](super::service::PerfusionStateMachine)
//! emits these through the [`EventSink`](super::ports::EventSink) port.
//! Adapters on the other side decide what to do with them: log to serial,
//! forward to the host dashboard, record in tests.

use crate::fsm::context::ValveState;
use crate::fsm::{PerfusionCommand, PerfusionState};
use crate::telemetry::StatusReport;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppEvent {
    /// The state machine has booted (carries initial state).
    Started(PerfusionState),

    /// The FSM transitioned between states.
    StateChanged {
        from: PerfusionState,
        to: PerfusionState,
    },

    /// The valve moved.
    ValveChanged(ValveState),

    /// A command arrived in a state that does not accept it.
    CommandIgnored {
        command: PerfusionCommand,
        state: PerfusionState,
    },

    /// The encoder flagged a weak magnetic field; carries the running count.
    EncoderDegraded(u32),

    /// Periodic status snapshot.
    Status(StatusReport),
}
