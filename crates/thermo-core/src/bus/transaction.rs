use core::sync::atomic::{AtomicI32, Ordering};

use crate::error::ThermoError;

/// Bytes exchanged per transaction: register address then data.
pub const TRANSFER_LEN: usize = 2;

const IDLE: i32 = i32::MIN;
const IN_FLIGHT: i32 = i32::MIN + 1;

/// Observed state of a [`CompletionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// No transaction has been issued yet
    Idle,
    InFlight,
    /// Finished with a driver status code, `0` meaning success
    Done(i32),
}

/// Completion sentinel written by the bus driver from interrupt context.
///
/// Exactly one transaction may be outstanding: [`begin`](Self::begin) refuses
/// to start another one while the previous is still in flight.
pub struct CompletionStatus {
    state: AtomicI32,
}

impl CompletionStatus {
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(IDLE),
        }
    }

    /// Mark a new transaction as in flight.
    pub fn begin(&self) -> Result<(), ThermoError> {
        if self.state.swap(IN_FLIGHT, Ordering::AcqRel) == IN_FLIGHT {
            return Err(ThermoError::Configuration(
                "bus transaction issued while another is in flight",
            ));
        }
        Ok(())
    }

    /// Completion callback. Called once per transaction by the driver.
    ///
    /// Status codes that collide with the internal sentinels are clamped to
    /// the closest representable error.
    pub fn complete(&self, status: i32) {
        self.state.store(status.max(IN_FLIGHT + 1), Ordering::Release);
    }

    pub fn state(&self) -> Completion {
        match self.state.load(Ordering::Acquire) {
            IDLE => Completion::Idle,
            IN_FLIGHT => Completion::InFlight,
            status => Completion::Done(status),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.state() == Completion::InFlight
    }
}

impl Default for CompletionStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// One full-duplex bus exchange.
///
/// The sequencer owns a single request and reloads it for every step, so no
/// buffer is allocated per transaction.
pub struct TransactionRequest<'a> {
    /// Chip select index of the target device
    pub chip_select: u8,
    pub tx: [u8; TRANSFER_LEN],
    pub rx: [u8; TRANSFER_LEN],
    len: usize,
    /// Release chip select once the exchange is over
    pub deassert: bool,
    completion: &'a CompletionStatus,
}

impl<'a> TransactionRequest<'a> {
    pub const fn new(chip_select: u8, completion: &'a CompletionStatus) -> Self {
        Self {
            chip_select,
            tx: [0; TRANSFER_LEN],
            rx: [0; TRANSFER_LEN],
            len: TRANSFER_LEN,
            deassert: true,
            completion,
        }
    }

    /// Load the outbound bytes for the next exchange and clear the inbound
    /// buffer.
    pub fn load(&mut self, tx: [u8; TRANSFER_LEN]) {
        self.tx = tx;
        self.rx = [0; TRANSFER_LEN];
        self.len = TRANSFER_LEN;
    }

    /// Number of bytes to clock in each direction. Never more than
    /// [`TRANSFER_LEN`].
    pub fn transfer_len(&self) -> usize {
        self.len
    }

    /// The cell the driver must signal when this exchange finishes.
    pub fn completion(&self) -> &'a CompletionStatus {
        self.completion
    }
}
