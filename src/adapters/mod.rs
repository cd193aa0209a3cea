//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements                       | Connects to            |
//! |---------------|----------------------------------|------------------------|
//! | `config_file` | ConfigPort                       | JSON file on the host  |
//! | `console`     | -                                | stdin line channel     |
//! | `log_sink`    | EventSink                        | `log` output           |
//! | `sim`         | AngleSensor, StepPulseTimer,     | Simulated bench shaft  |
//! |               | StepperDriverBus, OutputPin      |                        |
//! | `time`        | -                                | Monotonic clock        |

pub mod config_file;
pub mod console;
pub mod log_sink;
pub mod sim;
pub mod time;
