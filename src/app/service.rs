//! Perfusion state machine service: the hexagonal core.
//!
//! [`PerfusionStateMachine`] owns the FSM, its context, the valve and the
//! motor backend.  It exposes a hardware-agnostic command API to the outer
//! control loop; events flow out through an [`EventSink`] passed at each
//! call site, making the whole service testable with mock adapters.
//!
//! ```text
//!  commands / telemetry ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                           │  PerfusionStateMachine   │
//!  MotorBackend ◀───────────│  FSM · Flow · Valve      │
//!  OutputPin (valve) ◀──────└──────────────────────────┘
//! ```
//!
//! State handlers only write actuator commands; this service applies them,
//! touching the hardware only when a command actually changes.  When a
//! hardware write fails the FSM state is already committed; the error is
//! returned and the write is retried on the next tick.

use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::config::PerfusionConfig;
use crate::control::{FlowConverter, ValveController};
use crate::error::{Error, Result};
use crate::fsm::context::{FsmContext, MotorCommand, MotorDirection, ValveCommand, ValveState};
use crate::fsm::states::build_state_table;
use crate::fsm::{Disposition, Fsm, PerfusionCommand, PerfusionState};
use crate::telemetry::{StatusReport, TelemetrySample};

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{EventSink, MotorBackend};

// ───────────────────────────────────────────────────────────────
// PerfusionStateMachine
// ───────────────────────────────────────────────────────────────

pub struct PerfusionStateMachine<M: MotorBackend, P: OutputPin> {
    fsm: Fsm,
    ctx: FsmContext,
    motor: M,
    valve: ValveController<P>,
    flow: FlowConverter,
    /// Last motor command successfully written to the backend.
    applied_motor: Option<MotorCommand>,
    /// Last valve command applied.  Forced open/close is written only when
    /// this changes; `Evaluate` runs every time.
    applied_valve: Option<ValveCommand>,
    measured_rpm: f32,
    measured_direction: MotorDirection,
    tick_count: u64,
}

impl<M: MotorBackend, P: OutputPin> PerfusionStateMachine<M, P> {
    /// Validate the configuration, take the hardware and drive the valve closed.
    ///
    /// Does **not** start the FSM: call [`boot`](Self::boot) next.
    pub fn new(config: PerfusionConfig, motor: M, valve_pin: P) -> Result<Self> {
        config.validate()?;
        let valve = ValveController::new(valve_pin, config.valve_active_high)?;
        let flow = FlowConverter::new(config.flow);
        let velocity = flow.to_velocity(config.flow_rate);
        let ctx = FsmContext::new(config, velocity);
        let fsm = Fsm::new(build_state_table(), PerfusionState::Idle);

        Ok(Self {
            fsm,
            ctx,
            motor,
            valve,
            flow,
            applied_motor: None,
            applied_valve: None,
            measured_rpm: 0.0,
            measured_direction: MotorDirection::Stop,
            tick_count: 0,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Enter `Idle` and put the hardware in its safe state.
    pub fn boot(&mut self, sink: &mut impl EventSink) -> Result<()> {
        self.fsm.start(&mut self.ctx);
        sink.emit(&AppEvent::Started(self.fsm.current_state()));
        info!(
            "perfusion: booted, flow velocity {:.3} (floor {:.3})",
            self.ctx.flow_velocity,
            self.flow.floor_velocity()
        );
        self.apply_actuators(sink)
    }

    // ── State commands ────────────────────────────────────────

    pub fn start_perfusion(&mut self, sink: &mut impl EventSink) -> Result<Disposition> {
        self.dispatch(PerfusionCommand::Start, sink)
    }

    pub fn pause_perfusion(&mut self, sink: &mut impl EventSink) -> Result<Disposition> {
        self.dispatch(PerfusionCommand::Pause, sink)
    }

    pub fn continue_perfusion(&mut self, sink: &mut impl EventSink) -> Result<Disposition> {
        self.dispatch(PerfusionCommand::Continue, sink)
    }

    pub fn end_perfusion(&mut self, sink: &mut impl EventSink) -> Result<Disposition> {
        self.dispatch(PerfusionCommand::End, sink)
    }

    /// Route any inbound command.
    pub fn handle_command(&mut self, cmd: AppCommand, sink: &mut impl EventSink) -> Result<()> {
        match cmd {
            AppCommand::Start => self.start_perfusion(sink).map(drop),
            AppCommand::Pause => self.pause_perfusion(sink).map(drop),
            AppCommand::Continue => self.continue_perfusion(sink).map(drop),
            AppCommand::End => self.end_perfusion(sink).map(drop),
            AppCommand::SetTargetPressure(p) => self.set_target_pressure(p),
            AppCommand::SetCurrentPressure(p) => {
                self.set_current_pressure(p);
                Ok(())
            }
            AppCommand::SetFlowRate(rate) => self.set_flow_rate(rate, sink),
            AppCommand::SetEndPosition(pos) => self.set_end_position(pos),
            AppCommand::SetTravelPosition(pos) => {
                self.set_travel_position(pos);
                Ok(())
            }
            AppCommand::SetMotorSpeedRpm(rpm) => self.set_motor_speed_rpm(rpm, sink),
            AppCommand::OpenValve => self.open_valve(sink),
            AppCommand::CloseValve => self.close_valve(sink),
            AppCommand::ToggleValve => self.toggle_valve(sink),
        }
    }

    // ── Setters ───────────────────────────────────────────────

    /// Valve-opening threshold.  Negative or non-finite values are rejected.
    pub fn set_target_pressure(&mut self, pressure: f32) -> Result<()> {
        if !pressure.is_finite() || pressure < 0.0 {
            warn!("perfusion: target pressure {} rejected", pressure);
            return Err(Error::Config("target pressure must be finite and >= 0"));
        }
        self.ctx.config.target_pressure_mmhg = pressure;
        info!("perfusion: target pressure {:.2}", pressure);
        Ok(())
    }

    /// Overwrite the measured pressure.  Non-finite values are ignored.
    pub fn set_current_pressure(&mut self, pressure: f32) {
        if pressure.is_finite() {
            self.ctx.telemetry.current_pressure = pressure;
        }
    }

    /// Set the requested flow rate; re-commands the motor while perfusing.
    /// Clears any priming speed.  Non-finite rates are rejected.
    pub fn set_flow_rate(&mut self, rate: f32, sink: &mut impl EventSink) -> Result<()> {
        if !rate.is_finite() {
            warn!("perfusion: flow rate {} rejected", rate);
            return Err(Error::Config("flow rate must be finite"));
        }
        self.ctx.config.flow_rate = rate;
        self.ctx.flow_velocity = self.flow.to_velocity(rate);
        self.ctx.speed_override = None;
        info!(
            "perfusion: flow rate {} -> effective {:.3}, velocity {:.3}",
            rate,
            self.flow.effective_flow_rate(rate),
            self.ctx.flow_velocity
        );
        self.recommand_motor(sink)
    }

    /// Run the shaft at `rpm` for priming.  Zero, negative or non-finite
    /// values return to the flow-derived velocity.
    pub fn set_motor_speed_rpm(&mut self, rpm: f32, sink: &mut impl EventSink) -> Result<()> {
        self.ctx.speed_override = if rpm.is_finite() && rpm > 0.0 {
            Some(self.motor.velocity_for_rpm(rpm))
        } else {
            None
        };
        self.recommand_motor(sink)
    }

    /// Record the syringe travel limit (0 clears it).  Does not end a
    /// running perfusion by itself; the next tick checks it.  Negative
    /// positions are rejected.
    pub fn set_end_position(&mut self, position: i32) -> Result<()> {
        if position < 0 {
            warn!("perfusion: end position {} rejected", position);
            return Err(Error::Config("end position must be >= 0"));
        }
        self.ctx.config.end_position = position;
        info!("perfusion: end position {}", position);
        Ok(())
    }

    pub fn set_travel_position(&mut self, position: i32) {
        self.ctx.travel_position = position;
    }

    /// Merge a telemetry line.  Returns the number of fields consumed.
    pub fn update_telemetry(&mut self, line: &str) -> usize {
        self.ctx.telemetry.apply_line(line)
    }

    /// Store the encoder's measured speed for status output.
    pub fn record_encoder(&mut self, speed_rpm: f32, direction: MotorDirection) {
        self.measured_rpm = speed_rpm;
        self.measured_direction = direction;
    }

    // ── Valve maintenance ─────────────────────────────────────

    /// Force the valve open.  Held until the next threshold evaluation or
    /// state change.
    pub fn open_valve(&mut self, sink: &mut impl EventSink) -> Result<()> {
        let before = self.valve.state();
        self.valve.force_open()?;
        self.report_valve(before, sink);
        Ok(())
    }

    pub fn close_valve(&mut self, sink: &mut impl EventSink) -> Result<()> {
        let before = self.valve.state();
        self.valve.force_close()?;
        self.report_valve(before, sink);
        Ok(())
    }

    pub fn toggle_valve(&mut self, sink: &mut impl EventSink) -> Result<()> {
        let before = self.valve.state();
        self.valve.toggle()?;
        self.report_valve(before, sink);
        Ok(())
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// One control cycle: FSM update (travel limit, valve policy), then
    /// apply the resulting actuator commands.
    pub fn tick(&mut self, sink: &mut impl EventSink) -> Result<()> {
        self.tick_count += 1;
        let prev = self.fsm.current_state();
        self.fsm.tick(&mut self.ctx);
        self.report_transition(prev, sink);
        self.apply_actuators(sink)
    }

    /// Emit the current status snapshot.
    pub fn emit_status(&self, sink: &mut impl EventSink) {
        sink.emit(&AppEvent::Status(self.status_report()));
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.fsm.current_state(),
            valve: self.valve.state(),
            telemetry: self.ctx.telemetry,
            measured_rpm: self.measured_rpm,
            measured_direction: self.measured_direction,
            commanded_velocity: self.commanded_velocity(),
        }
    }

    pub fn state(&self) -> PerfusionState {
        self.fsm.current_state()
    }

    pub fn valve_state(&self) -> ValveState {
        self.valve.state()
    }

    /// Last commanded rotation (not measured).
    pub fn motor_direction(&self) -> MotorDirection {
        self.ctx.commanded_direction()
    }

    /// Signed velocity of the current motor command; 0 when stopped.
    pub fn commanded_velocity(&self) -> f32 {
        match self.ctx.commands.motor {
            MotorCommand::Stopped => 0.0,
            MotorCommand::Run { velocity } => velocity,
        }
    }

    pub fn target_pressure(&self) -> f32 {
        self.ctx.config.target_pressure_mmhg
    }

    pub fn current_pressure(&self) -> f32 {
        self.ctx.telemetry.current_pressure
    }

    pub fn flow_rate(&self) -> f32 {
        self.ctx.config.flow_rate
    }

    /// Floor-clamped rate actually delivered.
    pub fn effective_flow_rate(&self) -> f32 {
        self.flow.effective_flow_rate(self.ctx.config.flow_rate)
    }

    pub fn end_position(&self) -> i32 {
        self.ctx.config.end_position
    }

    pub fn travel_position(&self) -> i32 {
        self.ctx.travel_position
    }

    pub fn telemetry(&self) -> &TelemetrySample {
        &self.ctx.telemetry
    }

    pub fn measured_speed_rpm(&self) -> f32 {
        self.measured_rpm
    }

    pub fn measured_direction(&self) -> MotorDirection {
        self.measured_direction
    }

    pub fn config(&self) -> &PerfusionConfig {
        &self.ctx.config
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    /// Total control ticks executed since construction.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // ── Internal ──────────────────────────────────────────────

    fn dispatch(
        &mut self,
        command: PerfusionCommand,
        sink: &mut impl EventSink,
    ) -> Result<Disposition> {
        let prev = self.fsm.current_state();
        let disposition = self.fsm.dispatch(command, &mut self.ctx);
        if disposition == Disposition::Ignored {
            info!("perfusion: {:?} ignored in {:?}", command, prev);
            sink.emit(&AppEvent::CommandIgnored {
                command,
                state: prev,
            });
            return Ok(disposition);
        }
        self.report_transition(prev, sink);
        // Accepted state commands re-assert the valve over any maintenance override.
        self.applied_valve = None;
        self.apply_actuators(sink)?;
        Ok(disposition)
    }

    /// Push a changed flow / priming velocity to a running motor.
    fn recommand_motor(&mut self, sink: &mut impl EventSink) -> Result<()> {
        if self.fsm.current_state() != PerfusionState::Perfusing {
            return Ok(());
        }
        self.ctx.commands.motor = MotorCommand::Run {
            velocity: self.ctx.perfusion_velocity(),
        };
        self.apply_actuators(sink)
    }

    fn report_transition(&self, prev: PerfusionState, sink: &mut impl EventSink) {
        let now = self.fsm.current_state();
        if now != prev {
            sink.emit(&AppEvent::StateChanged { from: prev, to: now });
        }
    }

    fn report_valve(&self, before: ValveState, sink: &mut impl EventSink) {
        let after = self.valve.state();
        if after != before {
            sink.emit(&AppEvent::ValveChanged(after));
        }
    }

    /// Translate FSM actuator commands into backend and valve writes.
    ///
    /// The valve is driven even when the motor write fails; the first
    /// error is returned and the failed write is retried next tick.
    fn apply_actuators(&mut self, sink: &mut impl EventSink) -> Result<()> {
        let motor = self.apply_motor();
        let valve = self.apply_valve(sink);
        motor.and(valve)
    }

    fn apply_motor(&mut self) -> Result<()> {
        let cmd = self.ctx.commands.motor;
        if self.applied_motor == Some(cmd) {
            return Ok(());
        }
        match cmd {
            MotorCommand::Stopped => self.motor.disable()?,
            MotorCommand::Run { velocity } => {
                if !matches!(self.applied_motor, Some(MotorCommand::Run { .. })) {
                    self.motor.enable()?;
                }
                self.motor.set_velocity(velocity)?;
            }
        }
        self.applied_motor = Some(cmd);
        Ok(())
    }

    fn apply_valve(&mut self, sink: &mut impl EventSink) -> Result<()> {
        let before = self.valve.state();
        let cmd = self.ctx.commands.valve;
        let result = match cmd {
            ValveCommand::Evaluate => {
                let perfusing = self.fsm.current_state() == PerfusionState::Perfusing;
                self.valve
                    .evaluate(
                        self.ctx.telemetry.current_pressure,
                        self.ctx.config.target_pressure_mmhg,
                        perfusing,
                    )
                    .map(|_| self.applied_valve = Some(ValveCommand::Evaluate))
            }
            forced if self.applied_valve != Some(forced) => {
                let written = if forced == ValveCommand::Open {
                    self.valve.force_open()
                } else {
                    self.valve.force_close()
                };
                written.map(|()| self.applied_valve = Some(forced))
            }
            _ => Ok(()),
        };
        self.report_valve(before, sink);
        result.map_err(Error::from)
    }
}
