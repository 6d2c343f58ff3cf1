//! Hardware-independent core library for thermo
//!
//! This crate contains the interrupt-driven polling engine for an SPI
//! temperature sensor: trigger sources that run in interrupt context, the
//! transaction sequencer that owns the bus, and the dispatch loop that ties
//! them together. All peripherals are reached through the traits in
//! [`peripherals`], so the same logic runs on a microcontroller and on a
//! desktop host (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hardware;
pub mod peripherals;
pub mod sensors;
pub mod sequencer;
pub mod triggers;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PollerConfig;
pub use dispatch::{DispatchState, Dispatcher, Serviced, ServicePolicy};
pub use error::ThermoError;
pub use sensors::max31723::Reading;
pub use sequencer::{Purpose, Sequencer, Step};
pub use triggers::{TriggerFlag, TriggerKind, TriggerSource};
