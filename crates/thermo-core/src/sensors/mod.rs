//! Sensor register maps and the step sequences that drive them

pub mod max31723;

pub use max31723::{ConfigRegister, Reading, Resolution};
