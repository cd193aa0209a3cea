//! Function-pointer finite state machine engine.
//!
//! Classic embedded FSM pattern ported to Rust:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  StateTable                                                      │
//! │  ┌───────────┬──────────┬─────────┬────────────┬─────────────┐   │
//! │  │ State     │ on_enter │ on_exit │ on_command │ on_update   │   │
//! │  ├───────────┼──────────┼─────────┼────────────┼─────────────┤   │
//! │  │ Idle      │ fn(ctx)  │ fn(ctx) │ fn(ctx,c)  │ fn(ctx)->.. │   │
//! │  │ Perfusing │ fn(ctx)  │ fn(ctx) │ fn(ctx,c)  │ fn(ctx)->.. │   │
//! │  │ Paused    │ fn(ctx)  │ fn(ctx) │ fn(ctx,c)  │ fn(ctx)->.. │   │
//! │  └───────────┴──────────┴─────────┴────────────┴─────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operator commands go through [`Fsm::dispatch`]: the current state's
//! `on_command` decides whether the command causes a transition, is
//! handled in place, or is ignored.  Each control tick the engine calls
//! `on_update` for the current state; `Some(next)` triggers a transition.
//! Transitions run `on_exit` for the current state, then `on_enter` for
//! the next.  All functions receive `&mut FsmContext`, which holds the
//! latest telemetry, the actuator commands, travel tracking and config.

pub mod context;
pub mod states;

use context::FsmContext;
use log::{debug, info};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Enumeration of all perfusion states.
/// Must stay in sync with the state table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PerfusionState {
    Idle = 0,
    Perfusing = 1,
    Paused = 2,
}

impl PerfusionState {
    /// Total number of states: used to size the table array.
    pub const COUNT: usize = 3;

    /// Upper-case label used on the status line.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Perfusing => "PERFUSING",
            Self::Paused => "PAUSED",
        }
    }
}

// ---------------------------------------------------------------------------
// Commands and dispositions
// ---------------------------------------------------------------------------

/// Operator commands that may change the perfusion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfusionCommand {
    Start,
    Pause,
    Continue,
    End,
}

/// Outcome of offering a command to the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Leave the current state for the given one.
    Transition(PerfusionState),
    /// Accepted without changing state (actuator commands may have changed).
    Handled,
    /// Not valid in the current state.
    Ignored,
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
/// These run exactly once on each state transition.
pub type StateActionFn = fn(&mut FsmContext);

/// Signature for the per-command handler.
pub type StateCommandFn = fn(&mut FsmContext, PerfusionCommand) -> Disposition;

/// Signature for the per-tick update handler.
/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateUpdateFn = fn(&mut FsmContext) -> Option<PerfusionState>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single FSM state.
/// Stored in a fixed-size array: no heap, no `dyn`.
pub struct StateDescriptor {
    pub id: PerfusionState,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_command: StateCommandFn,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The finite state machine engine.
///
/// Owns the state table (array of [`StateDescriptor`]); the mutable
/// [`FsmContext`] is threaded through every handler call by the caller.
pub struct Fsm {
    /// Fixed-size table indexed by `PerfusionState as usize`.
    table: [StateDescriptor; PerfusionState::COUNT],
    /// Index of the currently active state.
    current: usize,
}

impl Fsm {
    /// Construct a new FSM with the given state table, starting in `initial`.
    pub fn new(table: [StateDescriptor; PerfusionState::COUNT], initial: PerfusionState) -> Self {
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Run the initial `on_enter` for the starting state.
    /// Call once after construction, before the first `tick()`.
    pub fn start(&mut self, ctx: &mut FsmContext) {
        info!("FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Offer an operator command to the current state and carry out any
    /// transition it requests.  Returns the handler's disposition.
    pub fn dispatch(&mut self, command: PerfusionCommand, ctx: &mut FsmContext) -> Disposition {
        let disposition = (self.table[self.current].on_command)(ctx, command);
        match disposition {
            Disposition::Transition(next) => self.transition(next, ctx),
            Disposition::Handled => {}
            Disposition::Ignored => debug!(
                "FSM: {:?} ignored in {}",
                command, self.table[self.current].name
            ),
        }
        disposition
    }

    /// Advance the FSM by one tick.
    ///
    /// 1. Call `on_update` for the current state.
    /// 2. If it returns `Some(next)`, execute the transition:
    ///    `on_exit(current)` → update pointer → `on_enter(next)`.
    pub fn tick(&mut self, ctx: &mut FsmContext) {
        if let Some(next) = (self.table[self.current].on_update)(ctx) {
            self.transition(next, ctx);
        }
    }

    /// The current state's identity.
    pub fn current_state(&self) -> PerfusionState {
        self.table[self.current].id
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next: PerfusionState, ctx: &mut FsmContext) {
        let next_idx = next as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
