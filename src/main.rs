//! Perfusion bench runner: drives the control loop on a development host.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  console channel   LogEventSink    JsonConfigFile   Clock    │
//! │  (packets + telemetry)  (EventSink)  (ConfigPort)            │
//! │  SimShaft ── StepDir / UART backend · SimAngleSensor         │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │        PerfusionStateMachine (pure logic)              │  │
//! │  │  FSM · FlowConverter · ValveController                 │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  EncoderTracker (polled once per cycle)                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each stdin line is either a dashboard packet (`START_PERFUSION,1.5,2`)
//! or a telemetry line (`x,y,pressure,tilt,...,`).  Status lines go to
//! stdout in the telemetry layout; logs go to stderr.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};

use perfusion::adapters::config_file::JsonConfigFile;
use perfusion::adapters::console::{self, ConsoleInput, INPUT_CHANNEL};
use perfusion::adapters::log_sink::LogEventSink;
use perfusion::adapters::sim::{SimAngleSensor, SimDriverBus, SimPin, SimShaft, SimStepTimer};
use perfusion::adapters::time::MonotonicClock;
use perfusion::app::commands::parse_packet;
use perfusion::app::events::AppEvent;
use perfusion::app::ports::{AngleSensor, ConfigError, ConfigPort, EventSink, MotorBackend};
use perfusion::app::service::PerfusionStateMachine;
use perfusion::config::{BackendKind, PerfusionConfig};
use perfusion::drivers::{StepDirStepper, UartStepper};
use perfusion::sensors::EncoderTracker;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    StepDir,
    Uart,
}

impl From<Backend> for BackendKind {
    fn from(b: Backend) -> Self {
        match b {
            Backend::StepDir => BackendKind::StepDir,
            Backend::Uart => BackendKind::UartDriver,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Syringe-perfusion controller bench runner")]
struct Args {
    /// JSON configuration file (defaults are used if it does not exist).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured motor backend.
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Stop after this many control ticks.
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Write the effective configuration back to `--config` and exit.
    #[arg(long, requires = "config")]
    write_config: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("perfusion bench v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        let kind = BackendKind::from(backend);
        if kind != config.backend {
            config.flow = PerfusionConfig::for_backend(kind).flow;
            config.backend = kind;
        }
    }
    config.validate().context("invalid configuration")?;

    if args.write_config {
        if let Some(path) = &args.config {
            JsonConfigFile::new(path).save(&config)?;
        }
        return Ok(());
    }

    let shaft = SimShaft::shared();
    let encoder = EncoderTracker::new(SimAngleSensor::new(shaft.clone()));
    let valve_pin = SimPin::default();

    match config.backend {
        BackendKind::StepDir => {
            let dir_pin = SimPin::default();
            let timer = SimStepTimer::new(
                shaft,
                dir_pin.clone(),
                config.stepper_steps_per_rev,
                config.stepper_microsteps,
            );
            let motor = StepDirStepper::new(
                SimPin::default(),
                dir_pin,
                timer,
                config.stepper_steps_per_rev,
                config.stepper_microsteps,
            )?;
            run(config, motor, valve_pin, encoder, args.max_ticks)
        }
        BackendKind::UartDriver => {
            let mut motor = UartStepper::new(
                SimDriverBus::new(shaft, config.stepper_steps_per_rev),
                config.stepper_steps_per_rev,
                config.driver_run_current_percent,
                config.driver_microsteps,
            );
            motor.begin().context("driver setup failed")?;
            run(config, motor, valve_pin, encoder, args.max_ticks)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PerfusionConfig> {
    let Some(path) = path else {
        return Ok(PerfusionConfig::default());
    };
    match JsonConfigFile::new(path).load() {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound) => {
            warn!("{} not found, using defaults", path.display());
            Ok(PerfusionConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

fn run<M: MotorBackend, S: AngleSensor>(
    config: PerfusionConfig,
    motor: M,
    valve_pin: SimPin,
    mut encoder: EncoderTracker<S>,
    max_ticks: Option<u64>,
) -> Result<()> {
    let interval = Duration::from_millis(u64::from(config.control_loop_interval_ms));
    let status_every_ms = u64::from(config.status_interval_ms);
    let travel_sign = config.perfusion_direction.sign();

    let clock = MonotonicClock::new();
    let mut sink = LogEventSink::new();
    let mut machine = PerfusionStateMachine::new(config, motor, valve_pin)?;
    machine.boot(&mut sink)?;

    spawn_stdin_reader();
    let mut next_status_ms = 0;
    let stdout = std::io::stdout();

    loop {
        // ── 1. Inbound packets and telemetry ─────────────────
        while let Ok(input) = INPUT_CHANNEL.try_receive() {
            match input {
                ConsoleInput::Line(line) => handle_line(&mut machine, &line, &mut sink),
                ConsoleInput::Closed => {
                    info!("input closed, ending run");
                    machine.end_perfusion(&mut sink)?;
                    return Ok(());
                }
            }
        }

        // ── 2. Encoder ───────────────────────────────────────
        match encoder.poll(clock.uptime_us()) {
            Ok(sample) => {
                if sample.magnetic_error {
                    sink.emit(&AppEvent::EncoderDegraded(encoder.magnetic_error_count()));
                }
                machine.record_encoder(encoder.speed_rpm(), encoder.direction());
                let travel = (encoder.total_counts() as f32 * travel_sign) as i32;
                machine.set_travel_position(travel);
            }
            Err(e) => warn!("encoder: {}, retrying next cycle", e),
        }

        // ── 3. Control tick ──────────────────────────────────
        if let Err(e) = machine.tick(&mut sink) {
            error!("control tick: {}", e);
        }

        // ── 4. Status line ───────────────────────────────────
        if clock.uptime_ms() >= next_status_ms {
            next_status_ms = clock.uptime_ms() + status_every_ms;
            machine.emit_status(&mut sink);
            match machine.status_report().to_line() {
                Ok(line) => writeln!(stdout.lock(), "{}", line)?,
                Err(_) => warn!("status line overflow"),
            }
        }

        if max_ticks.is_some_and(|max| machine.tick_count() >= max) {
            info!("tick limit reached, ending run");
            machine.end_perfusion(&mut sink)?;
            return Ok(());
        }

        thread::sleep(interval);
    }
}

fn handle_line<M: MotorBackend>(
    machine: &mut PerfusionStateMachine<M, SimPin>,
    line: &str,
    sink: &mut impl EventSink,
) {
    if let Some(commands) = parse_packet(line) {
        for cmd in commands {
            if let Err(e) = machine.handle_command(cmd, sink) {
                warn!("{:?}: {}", cmd, e);
            }
        }
    } else if machine.update_telemetry(line) == 0 {
        debug!("unrecognised line {:?}", line);
    }
}

fn spawn_stdin_reader() {
    thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    console::forward_line(&INPUT_CHANNEL, &line);
                }
                Err(e) => {
                    warn!("stdin: {}", e);
                    break;
                }
            }
        }
        console::forward_close(&INPUT_CHANNEL);
    });
}
