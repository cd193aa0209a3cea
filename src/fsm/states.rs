//! Concrete state handler functions and table builder.
//!
//! Each state is defined by plain `fn` pointers: no closures, no dynamic
//! dispatch, no heap.  Handlers only write actuator *commands* into the
//! context; the application service applies them to the motor backend and
//! the valve.
//!
//! ```text
//!            ┌───────────[end / limit reached]────────────┐
//!            ▼                                            │
//!  IDLE ──[start]──▶ PERFUSING ──[pause]──▶ PAUSED ───────┤
//!    ▲                   ▲                    │           │
//!    │                   └─[continue/start]───┘           │
//!    └──────────────────────[end]─────────────────────────┘
//!
//!  start while the travel limit is reached ──▶ IDLE
//! ```

use super::context::{ActuatorCommands, FsmContext, MotorCommand, ValveCommand};
use super::{Disposition, PerfusionCommand, PerfusionState, StateDescriptor};
use crate::config::EndValvePolicy;
use log::info;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; PerfusionState::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: PerfusionState::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_command: idle_command,
            on_update: idle_update,
        },
        // Index 1: Perfusing
        StateDescriptor {
            id: PerfusionState::Perfusing,
            name: "Perfusing",
            on_enter: Some(perfusing_enter),
            on_exit: Some(perfusing_exit),
            on_command: perfusing_command,
            on_update: perfusing_update,
        },
        // Index 2: Paused
        StateDescriptor {
            id: PerfusionState::Paused,
            name: "Paused",
            on_enter: Some(paused_enter),
            on_exit: None,
            on_command: paused_command,
            on_update: paused_update,
        },
    ]
}

/// Stop the motor and put the valve where the end-of-run policy wants it.
fn finish_run(ctx: &mut FsmContext) {
    ctx.commands.motor = MotorCommand::Stopped;
    ctx.commands.valve = match ctx.config.end_valve_policy {
        EndValvePolicy::Close => ValveCommand::Close,
        EndValvePolicy::DrainOpen => ValveCommand::Open,
    };
    ctx.run_ended = false;
}

/// Shared `start` handling for Idle and Paused.
fn start_or_finish(ctx: &mut FsmContext, from: PerfusionState) -> Disposition {
    if !ctx.end_reached() {
        return Disposition::Transition(PerfusionState::Perfusing);
    }
    info!(
        "START: travel {} already at end position {}",
        ctx.travel_position, ctx.config.end_position
    );
    if from == PerfusionState::Idle {
        finish_run(ctx);
        Disposition::Handled
    } else {
        ctx.run_ended = true;
        Disposition::Transition(PerfusionState::Idle)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut FsmContext) {
    if ctx.run_ended {
        finish_run(ctx);
        info!("IDLE: run finished, valve {:?}", ctx.commands.valve);
    } else {
        ctx.commands = ActuatorCommands::all_off();
        info!("IDLE: motor off, valve closed");
    }
}

fn idle_command(ctx: &mut FsmContext, command: PerfusionCommand) -> Disposition {
    match command {
        PerfusionCommand::Start => start_or_finish(ctx, PerfusionState::Idle),
        PerfusionCommand::End => {
            // Already idle: re-assert the stopped outputs.
            finish_run(ctx);
            Disposition::Handled
        }
        PerfusionCommand::Pause | PerfusionCommand::Continue => Disposition::Ignored,
    }
}

fn idle_update(_ctx: &mut FsmContext) -> Option<PerfusionState> {
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  PERFUSING state: motor pushing the plunger, valve follows pressure
// ═══════════════════════════════════════════════════════════════════════════

fn perfusing_enter(ctx: &mut FsmContext) {
    let velocity = ctx.perfusion_velocity();
    ctx.commands.motor = MotorCommand::Run { velocity };
    ctx.commands.valve = ValveCommand::Evaluate;
    info!(
        "PERFUSING: velocity {:.3}, target pressure {:.2}",
        velocity, ctx.config.target_pressure_mmhg
    );
}

fn perfusing_exit(ctx: &mut FsmContext) {
    ctx.commands.motor = MotorCommand::Stopped;
}

fn perfusing_command(ctx: &mut FsmContext, command: PerfusionCommand) -> Disposition {
    match command {
        PerfusionCommand::Pause => Disposition::Transition(PerfusionState::Paused),
        PerfusionCommand::End => {
            ctx.run_ended = true;
            Disposition::Transition(PerfusionState::Idle)
        }
        PerfusionCommand::Start | PerfusionCommand::Continue => Disposition::Ignored,
    }
}

fn perfusing_update(ctx: &mut FsmContext) -> Option<PerfusionState> {
    if ctx.end_reached() {
        info!(
            "PERFUSING: travel {} reached end position {}",
            ctx.travel_position, ctx.config.end_position
        );
        ctx.run_ended = true;
        return Some(PerfusionState::Idle);
    }
    ctx.commands.valve = ValveCommand::Evaluate;
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  PAUSED state: motor stopped, valve held closed
// ═══════════════════════════════════════════════════════════════════════════

fn paused_enter(ctx: &mut FsmContext) {
    ctx.commands.motor = MotorCommand::Stopped;
    ctx.commands.valve = ValveCommand::Close;
    info!("PAUSED: motor stopped, valve closed");
}

fn paused_command(ctx: &mut FsmContext, command: PerfusionCommand) -> Disposition {
    match command {
        PerfusionCommand::Continue => Disposition::Transition(PerfusionState::Perfusing),
        PerfusionCommand::Start => start_or_finish(ctx, PerfusionState::Paused),
        PerfusionCommand::End => {
            ctx.run_ended = true;
            Disposition::Transition(PerfusionState::Idle)
        }
        PerfusionCommand::Pause => Disposition::Ignored,
    }
}

fn paused_update(_ctx: &mut FsmContext) -> Option<PerfusionState> {
    None
}
