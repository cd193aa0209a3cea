//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to the
//! `log` facade (UART on the device, `env_logger` on the host).  A dashboard
//! bridge would implement the same trait.

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started(state) => {
                info!("START | initial_state={:?}", state);
            }
            AppEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            AppEvent::ValveChanged(valve) => {
                info!("VALVE | {}", valve.label());
            }
            AppEvent::CommandIgnored { command, state } => {
                info!("CMD   | {:?} ignored in {:?}", command, state);
            }
            AppEvent::EncoderDegraded(count) => {
                warn!("ENC   | magnetic field error (total {})", count);
            }
            AppEvent::Status(report) => match report.to_line() {
                Ok(line) => debug!("STAT  | {}", line),
                Err(_) => warn!("STAT  | status line overflow"),
            },
        }
    }
}
