//! Control laws: flow → velocity conversion and the pressure-gated valve.

pub mod flow;
pub mod valve;

pub use flow::FlowConverter;
pub use valve::{ValveController, valve_policy};
