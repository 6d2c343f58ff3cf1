//! Transaction sequencer
//!
//! Drives an ordered list of register steps over the bus, one transaction at
//! a time, and assembles the temperature reading from the MSB and LSB steps.
//! The sequencer is the only owner of the bus and of the request buffer.

use core::fmt;

use embedded_hal::digital::StatefulOutputPin;
use log::{debug, trace, warn};

use crate::bus::{Completion, CompletionStatus, TRANSFER_LEN, TransactionRequest};
use crate::error::ThermoError;
use crate::peripherals::{BusDriver, NoPin};
use crate::sensors::max31723::{ConfigRegister, Reading, WRITE_BIT};

/// Longest sequence accepted by [`Sequencer::run_sequence`].
pub const MAX_STEPS: usize = 8;

/// What a step is for, which decides what happens to the received byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    ConfigRead,
    ConfigWrite,
    TemperatureMsb,
    TemperatureLsb,
}

impl Purpose {
    pub const fn is_write(self) -> bool {
        matches!(self, Self::ConfigWrite)
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ConfigRead => "configuration read",
            Self::ConfigWrite => "configuration write",
            Self::TemperatureMsb => "temperature MSB read",
            Self::TemperatureLsb => "temperature LSB read",
        };
        f.write_str(label)
    }
}

/// A single register exchange: address byte, data byte and purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    address: u8,
    data: u8,
    purpose: Purpose,
}

impl Step {
    /// Select `register` and clock out a dummy byte to read it.
    pub const fn read(register: u8, purpose: Purpose) -> Self {
        Self {
            address: register,
            data: 0x00,
            purpose,
        }
    }

    /// Write `value` into `register`.
    pub const fn write(register: u8, value: u8, purpose: Purpose) -> Self {
        Self {
            address: register | WRITE_BIT,
            data: value,
            purpose,
        }
    }

    /// A step with the address byte taken as is.
    pub const fn raw(address: u8, data: u8, purpose: Purpose) -> Self {
        Self {
            address,
            data,
            purpose,
        }
    }

    pub const fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub const fn data(&self) -> u8 {
        self.data
    }

    /// Outbound bytes for this step.
    pub const fn tx(&self) -> [u8; TRANSFER_LEN] {
        [self.address, self.data]
    }

    fn validate(&self) -> Result<(), ThermoError> {
        let addresses_write = self.address & WRITE_BIT != 0;
        match (self.purpose.is_write(), addresses_write) {
            (true, false) => Err(ThermoError::Configuration(
                "write step is missing the write bit",
            )),
            (false, true) => Err(ThermoError::Configuration(
                "read step addresses a register for writing",
            )),
            _ => Ok(()),
        }
    }
}

/// Check a whole sequence before any of it goes on the bus.
pub fn validate_sequence(steps: &[Step]) -> Result<(), ThermoError> {
    if steps.is_empty() {
        return Err(ThermoError::Configuration("empty step sequence"));
    }
    if steps.len() > MAX_STEPS {
        return Err(ThermoError::Configuration("step sequence too long"));
    }
    for step in steps {
        step.validate()?;
    }
    let reads = |purpose: Purpose| steps.iter().any(|s| s.purpose == purpose);
    if !reads(Purpose::TemperatureMsb) || !reads(Purpose::TemperatureLsb) {
        return Err(ThermoError::Configuration(
            "sequence does not read both temperature registers",
        ));
    }
    Ok(())
}

/// Executes register steps strictly in order over an asynchronous bus.
///
/// For each step the shared request is reloaded, the completion cell is
/// marked in flight, the transaction is started and the sequencer spins
/// until the driver signals completion. The heartbeat output toggles once per
/// step, however long the wait.
///
/// The spin has no timeout: a driver that never completes hangs the caller.
pub struct Sequencer<'a, B, P = NoPin> {
    bus: B,
    heartbeat: P,
    request: TransactionRequest<'a>,
    last_config: Option<ConfigRegister>,
    transactions: u32,
}

impl<'a, B> Sequencer<'a, B, NoPin>
where
    B: BusDriver<'a>,
{
    /// Create a sequencer addressing `chip_select` whose driver signals
    /// `completion`.
    pub fn new(bus: B, completion: &'a CompletionStatus, chip_select: u8) -> Self {
        Self {
            bus,
            heartbeat: NoPin,
            request: TransactionRequest::new(chip_select, completion),
            last_config: None,
            transactions: 0,
        }
    }
}

impl<'a, B, P> Sequencer<'a, B, P> {
    /// Attach a status output that toggles once per bus step.
    pub fn with_heartbeat<Q>(self, heartbeat: Q) -> Sequencer<'a, B, Q>
    where
        Q: StatefulOutputPin,
    {
        Sequencer {
            bus: self.bus,
            heartbeat,
            request: self.request,
            last_config: self.last_config,
            transactions: self.transactions,
        }
    }

    /// Access the bus driver, e.g. for bring-up configuration.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn heartbeat(&self) -> &P {
        &self.heartbeat
    }

    /// Value of the most recent configuration register read.
    pub fn last_config(&self) -> Option<ConfigRegister> {
        self.last_config
    }

    /// Total number of bus transactions issued.
    pub fn transactions(&self) -> u32 {
        self.transactions
    }

    pub fn chip_select(&self) -> u8 {
        self.request.chip_select
    }
}

impl<'a, B, P> Sequencer<'a, B, P>
where
    B: BusDriver<'a>,
    P: StatefulOutputPin,
{
    /// Run one step and return the data byte clocked in.
    pub fn transfer(&mut self, step: &Step) -> Result<u8, ThermoError> {
        step.validate()?;

        self.request.load(step.tx());
        self.request.completion().begin()?;
        self.transactions = self.transactions.wrapping_add(1);
        trace!(
            "CS{} -> {:02X?} ({})",
            self.request.chip_select,
            self.request.tx,
            step.purpose
        );
        self.bus.begin_transaction(&mut self.request);

        let status = self.wait_for_completion();
        if status != 0 {
            return Err(ThermoError::Bus {
                step: step.purpose,
                status,
            });
        }
        Ok(self.request.rx[1])
    }

    /// Spin until the driver signals completion and return its status.
    fn wait_for_completion(&mut self) -> i32 {
        // One visible toggle per step, not per spin
        self.heartbeat.toggle().ok();

        let completion = self.request.completion();
        loop {
            match completion.state() {
                Completion::Done(status) => return status,
                Completion::InFlight | Completion::Idle => core::hint::spin_loop(),
            }
        }
    }

    /// Run `steps` in order and combine the temperature registers.
    ///
    /// The first failing step aborts the rest of the sequence. Nothing is
    /// retried.
    pub fn run_sequence(&mut self, steps: &[Step]) -> Result<Reading, ThermoError> {
        validate_sequence(steps)?;

        let mut msb = None;
        let mut lsb = None;
        for (index, step) in steps.iter().enumerate() {
            let data = self.transfer(step).map_err(|e| {
                warn!("Sequence aborted at step {} of {}: {}", index + 1, steps.len(), e);
                e
            })?;

            match step.purpose {
                Purpose::ConfigRead => {
                    let config = ConfigRegister(data);
                    debug!("Configuration Register: {}", config);
                    self.last_config = Some(config);
                }
                Purpose::ConfigWrite => {
                    debug!("Configuration Register Value Sent: {}", ConfigRegister(step.data));
                }
                Purpose::TemperatureMsb => {
                    debug!("Temperature MSB: {}", data);
                    msb = Some(data);
                }
                Purpose::TemperatureLsb => {
                    debug!("Temperature LSB: {}", data);
                    lsb = Some(data);
                }
            }
        }

        match (msb, lsb) {
            (Some(msb), Some(lsb)) => Ok(Reading::from_registers(msb, lsb)),
            _ => Err(ThermoError::Configuration(
                "sequence does not read both temperature registers",
            )),
        }
    }
}
