//! Trigger sources
//!
//! A trigger source is an interrupt-driven producer of "poll now" events.
//! Its handler runs in interrupt context, masks the source and posts the
//! source's [`TriggerFlag`]. The dispatch loop takes the flag, does the bus
//! work, then finishes the flag and re-arms the source, so at most one
//! instance of a source's work is ever outstanding.

mod button;
mod rtc;
mod timer;

pub use button::ButtonSource;
pub use rtc::RtcAlarmSource;
pub use timer::TimerSource;

use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use log::trace;

use crate::error::ThermoError;

/// Which source produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Button,
    Timer,
    RtcAlarm,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Button => "BUTTON",
            Self::Timer => "TIMER",
            Self::RtcAlarm => "RTC ALARM",
        };
        f.write_str(label)
    }
}

/// Lifecycle of a [`TriggerFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Idle,
    /// Posted by the handler, not yet seen by the dispatch loop
    Pending,
    /// Taken by the dispatch loop, work in progress
    Servicing,
}

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const SERVICING: u8 = 2;

/// Single-producer / single-consumer event flag.
///
/// Only the owning interrupt handler moves it from idle to pending, and only
/// the dispatch loop moves it on from there. Every transition is a single
/// atomic compare-exchange, so an event can be neither lost between the
/// check and the clear nor observed twice.
pub struct TriggerFlag {
    state: AtomicU8,
    posted: AtomicU32,
}

impl TriggerFlag {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            posted: AtomicU32::new(0),
        }
    }

    /// Idle -> pending. Returns `false` (and changes nothing) if the previous
    /// event has not been fully serviced yet.
    pub fn post(&self) -> bool {
        let posted = self
            .state
            .compare_exchange(IDLE, PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if posted {
            self.posted.fetch_add(1, Ordering::Relaxed);
        } else {
            trace!("Trigger already outstanding, event dropped");
        }
        posted
    }

    /// Pending -> servicing. Returns whether there was an event to service.
    pub fn take(&self) -> bool {
        self.state
            .compare_exchange(PENDING, SERVICING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Servicing -> idle, once the work is done.
    pub fn finish(&self) {
        let _ = self.state.compare_exchange(
            SERVICING,
            IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn state(&self) -> FlagState {
        match self.state.load(Ordering::Acquire) {
            PENDING => FlagState::Pending,
            SERVICING => FlagState::Servicing,
            _ => FlagState::Idle,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == FlagState::Pending
    }

    /// Number of events accepted since boot.
    pub fn posted(&self) -> u32 {
        self.posted.load(Ordering::Relaxed)
    }
}

impl Default for TriggerFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// An interrupt source that posts exactly one pending event at a time and
/// can be disarmed and re-armed as a unit.
///
/// Implementations are shared between an interrupt handler and the dispatch
/// loop, so every method takes `&self`.
pub trait TriggerSource: Sync {
    fn kind(&self) -> TriggerKind;

    fn flag(&self) -> &TriggerFlag;

    /// Unmask the source after its pending work has been serviced.
    fn rearm(&self) -> Result<(), ThermoError>;

    /// Mask the source.
    fn disarm(&self) -> Result<(), ThermoError>;
}
