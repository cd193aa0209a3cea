//! Line channel between the console reader and the control loop.
//!
//! ```text
//! ┌──────────────┐ ConsoleInput ┌──────────────┐
//! │ stdin reader │─────────────▶│ Control loop │
//! │  (thread)    │              │ (try_receive)│
//! └──────────────┘              └──────────────┘
//! ```
//!
//! The channel is bounded and holds fixed-capacity lines, so a stalled
//! control loop holds back the reader instead of growing a queue.

use std::thread;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use heapless::String;
use log::warn;

/// Longest accepted input line, in bytes.
pub const LINE_CAPACITY: usize = 256;

/// Lines buffered between the reader and the loop.
const INPUT_DEPTH: usize = 16;

const RETRY_INTERVAL: Duration = Duration::from_millis(1);

pub enum ConsoleInput {
    Line(String<LINE_CAPACITY>),
    /// End of input; nothing follows.
    Closed,
}

pub type InputChannel = Channel<CriticalSectionRawMutex, ConsoleInput, INPUT_DEPTH>;

/// Console lines: reader thread → control loop.
pub static INPUT_CHANNEL: InputChannel = Channel::new();

/// Queue one line, waiting while the channel is full.
///
/// Returns `false` if the line does not fit [`LINE_CAPACITY`] and was dropped.
pub fn forward_line(channel: &InputChannel, line: &str) -> bool {
    let mut buf = String::new();
    if buf.push_str(line).is_err() {
        warn!("console: {} byte line exceeds {}, dropped", line.len(), LINE_CAPACITY);
        return false;
    }
    send_blocking(channel, ConsoleInput::Line(buf));
    true
}

/// Mark the end of input.
pub fn forward_close(channel: &InputChannel) {
    send_blocking(channel, ConsoleInput::Closed);
}

fn send_blocking(channel: &InputChannel, mut msg: ConsoleInput) {
    loop {
        match channel.try_send(msg) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                msg = back;
                thread::sleep(RETRY_INTERVAL);
            }
        }
    }
}
