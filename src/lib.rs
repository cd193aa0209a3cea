//! Syringe-perfusion controller firmware library.
//!
//! Exposes the pure-logic modules (state machine, flow conversion, valve
//! policy, encoder tracking, telemetry codec) for integration testing and
//! for the host bench runner.  Hardware is reached only through
//! `embedded-hal` traits and the ports in [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod sensors;
pub mod telemetry;
