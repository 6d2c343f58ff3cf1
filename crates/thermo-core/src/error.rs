//! Error taxonomy for the polling engine

use thiserror_no_std::Error;

use crate::sequencer::Purpose;

/// Errors surfaced by bring-up, the sequencer and the dispatch loop.
///
/// RTC busy conditions never show up here: they are absorbed by
/// [`busy_retry`](crate::peripherals::busy_retry).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermoError {
    /// A peripheral failed to configure. Fatal at bring-up.
    #[error("{peripheral} initialization failed (code {code})")]
    Initialization { peripheral: &'static str, code: i32 },
    /// A peripheral access failed after bring-up (anything but busy).
    #[error("{peripheral} access failed (code {code})")]
    Peripheral { peripheral: &'static str, code: i32 },
    /// A bus transaction completed with a non-zero status.
    #[error("bus transaction failed during {step} (status {status})")]
    Bus { step: Purpose, status: i32 },
    /// A sequence or wiring mistake. Not expected at runtime.
    #[error("configuration error: {0}")]
    Configuration(&'static str),
}

impl ThermoError {
    /// Whether the device has to stop after reporting this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Initialization { .. })
    }
}
