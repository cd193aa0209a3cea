//! Hardware drivers: syringe motor backends and the encoder SPI front end.

pub mod as5048a;
pub mod stepper;
pub mod uart_stepper;

pub use as5048a::As5048a;
pub use stepper::StepDirStepper;
pub use uart_stepper::UartStepper;
