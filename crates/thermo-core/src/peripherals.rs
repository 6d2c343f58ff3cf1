//! Peripheral collaborator traits
//!
//! The engine never touches registers directly. Board support code (or the
//! simulator) implements these traits for the actual SPI, GPIO, timer and RTC
//! blocks, and the engine drives them through here.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin, StatefulOutputPin};
use embedded_hal::spi::Mode;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::bus::TransactionRequest;

/// Error reported by a peripheral configuration call.
///
/// `code` is the driver specific error code (zero is never an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverError {
    pub code: i32,
}

impl DriverError {
    pub const fn new(code: i32) -> Self {
        Self { code }
    }
}

/// Number of data lines used by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataWidth {
    /// Separate MOSI and MISO lines (full duplex)
    Standard,
    /// Single bidirectional line
    ThreeWire,
    Dual,
    Quad,
}

/// Static bus configuration applied by [`BusDriver::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Clock rate in Hz
    pub speed_hz: u32,
    /// Chip select line driven by every transaction
    pub chip_select: u8,
    /// Whether the chip select line is active high
    pub chip_select_active_high: bool,
}

/// Asynchronous full-duplex bus driver.
///
/// `begin_transaction` starts the exchange described by the request and
/// returns immediately. When the exchange is over, the driver (usually from
/// its interrupt handler) calls [`CompletionStatus::complete`] on the
/// request's completion cell with `0` for success or a driver error code.
///
/// The lifetime `'a` is the lifetime of that completion cell. Drivers that
/// finish the exchange from another context need `'static`.
///
/// [`CompletionStatus::complete`]: crate::bus::CompletionStatus::complete
pub trait BusDriver<'a> {
    fn init(&mut self, config: &BusConfig) -> Result<(), DriverError>;

    fn set_mode(&mut self, mode: Mode) -> Result<(), DriverError>;

    fn set_data_width(&mut self, width: DataWidth) -> Result<(), DriverError>;

    /// Set the number of bits per transferred word.
    fn set_word_size(&mut self, bits: u8) -> Result<(), DriverError>;

    /// Start a transaction. The received bytes land in `request.rx` before
    /// completion is signalled.
    fn begin_transaction(&mut self, request: &mut TransactionRequest<'a>);
}

/// A maskable interrupt source, such as the NVIC line of a GPIO port.
///
/// Methods take `&self` because an interrupt handler masks the line while the
/// main loop unmasks it. Implementations must make each call atomic.
pub trait InterruptLine {
    fn enable(&self);
    fn disable(&self);
    fn is_enabled(&self) -> bool;
}

/// Status output that does nothing. The default for every optional
/// indicator or heartbeat pin.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl StatefulOutputPin for NoPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Timer counting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Continuous,
}

/// Settings for a hardware timer, computed by
/// [`TimerConfig::for_frequency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub prescaler: u32,
    pub mode: TimerMode,
    /// Count at which the timer wraps and raises its interrupt
    pub compare_count: u32,
    /// Frequency of the timer input clock in Hz
    pub clock_hz: u32,
}

impl TimerConfig {
    /// Continuous timer configuration firing at `frequency_hz` from a clock of
    /// `clock_hz` divided by `prescaler`.
    pub fn for_frequency(clock_hz: u32, prescaler: u32, frequency_hz: u32) -> Option<Self> {
        if prescaler == 0 || frequency_hz == 0 {
            return None;
        }
        let compare_count = clock_hz / prescaler / frequency_hz;
        if compare_count == 0 {
            return None;
        }
        Some(Self {
            prescaler,
            mode: TimerMode::Continuous,
            compare_count,
            clock_hz,
        })
    }
}

/// Periodic hardware timer with a vectored compare-match interrupt.
pub trait PeriodicTimer {
    fn configure(&mut self, config: &TimerConfig) -> Result<(), DriverError>;
    fn start(&mut self);
    fn stop(&mut self);
    fn enable_interrupt(&mut self);
    fn disable_interrupt(&mut self);
    /// Clear the hardware pending bit. Must be called from the handler.
    fn clear_pending(&mut self);
}

/// Errors reported by RTC register accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcError {
    /// The RTC is synchronising its registers. Retry.
    Busy,
    /// Driver specific failure code.
    Fault(i32),
}

/// Real-time clock with a single time-of-day alarm.
pub trait Rtc {
    fn seconds(&mut self) -> Result<u32, RtcError>;
    fn subseconds(&mut self) -> Result<u32, RtcError>;
    fn set_alarm(&mut self, seconds: u32) -> Result<(), RtcError>;
    fn enable_alarm_interrupt(&mut self) -> Result<(), RtcError>;
    fn disable_alarm_interrupt(&mut self) -> Result<(), RtcError>;
    fn clear_alarm_flag(&mut self) -> Result<(), RtcError>;
}

/// Retry an RTC access while the RTC reports itself busy.
///
/// There is no upper bound: the RTC's own ready protocol is trusted to
/// release the registers eventually. Any other error is returned as its
/// driver code.
pub fn busy_retry<T>(mut access: impl FnMut() -> Result<T, RtcError>) -> Result<T, i32> {
    let mut spins: u32 = 0;
    loop {
        match access() {
            Ok(value) => {
                if spins > 0 {
                    trace!("RTC ready after {} busy retries", spins);
                }
                return Ok(value);
            }
            Err(RtcError::Busy) => {
                spins = spins.wrapping_add(1);
                core::hint::spin_loop();
            }
            Err(RtcError::Fault(code)) => return Err(code),
        }
    }
}
