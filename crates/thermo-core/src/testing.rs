//! Test doubles for the peripheral traits

use core::convert::Infallible;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin, StatefulOutputPin};
use embedded_hal::spi::Mode;

use crate::bus::{Completion, TransactionRequest};
use crate::peripherals::{
    BusConfig, BusDriver, DataWidth, DriverError, InterruptLine, PeriodicTimer, Rtc, RtcError,
    TimerConfig,
};
use crate::sensors::max31723::WRITE_BIT;

/// Output pin that counts toggles.
pub struct CountingPin {
    pub high: bool,
    pub toggles: u32,
}

impl CountingPin {
    pub fn new() -> Self {
        Self {
            high: false,
            toggles: 0,
        }
    }
}

impl ErrorType for CountingPin {
    type Error = Infallible;
}

impl OutputPin for CountingPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.high = true;
        Ok(())
    }
}

impl StatefulOutputPin for CountingPin {
    fn is_set_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.high)
    }

    fn is_set_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.high)
    }

    fn toggle(&mut self) -> Result<(), Infallible> {
        self.high = !self.high;
        self.toggles += 1;
        Ok(())
    }
}

/// Register model of a MAX31723 behind a bus that completes synchronously.
pub struct SensorBus {
    pub registers: [u8; 3],
    /// Every outbound byte pair, in order
    pub sent: Vec<[u8; 2]>,
    /// Transaction index (zero based) that completes with `fail_status`
    pub fail_at: Option<usize>,
    pub fail_status: i32,
    /// Name of the configuration call that fails
    pub fail_config: Option<&'static str>,
    pub config_calls: Vec<&'static str>,
}

impl SensorBus {
    pub fn with_temperature(msb: u8, lsb: u8) -> Self {
        Self {
            registers: [0x00, lsb, msb],
            sent: Vec::new(),
            fail_at: None,
            fail_status: -1,
            fail_config: None,
            config_calls: Vec::new(),
        }
    }

    fn config_call(&mut self, name: &'static str) -> Result<(), DriverError> {
        self.config_calls.push(name);
        if self.fail_config == Some(name) {
            Err(DriverError::new(-2))
        } else {
            Ok(())
        }
    }
}

impl<'a> BusDriver<'a> for SensorBus {
    fn init(&mut self, _config: &BusConfig) -> Result<(), DriverError> {
        self.config_call("init")
    }

    fn set_mode(&mut self, _mode: Mode) -> Result<(), DriverError> {
        self.config_call("set_mode")
    }

    fn set_data_width(&mut self, _width: DataWidth) -> Result<(), DriverError> {
        self.config_call("set_data_width")
    }

    fn set_word_size(&mut self, _bits: u8) -> Result<(), DriverError> {
        self.config_call("set_word_size")
    }

    fn begin_transaction(&mut self, request: &mut TransactionRequest<'a>) {
        assert_eq!(request.completion().state(), Completion::InFlight);

        let index = self.sent.len();
        self.sent.push(request.tx);

        let address = request.tx[0];
        let register = usize::from(address & !WRITE_BIT);
        if address & WRITE_BIT != 0 {
            self.registers[register] = request.tx[1];
        } else {
            request.rx = [0xFF, self.registers[register]];
        }

        let status = if self.fail_at == Some(index) {
            self.fail_status
        } else {
            0
        };
        request.completion().complete(status);
    }
}

/// Bus whose completion arrives later from another thread, like a real
/// interrupt-driven driver.
///
/// Counts transactions between `begin_transaction` and the completion
/// callback and records the highest count seen.
pub struct DeferredBus {
    registers: [u8; 3],
    in_flight: Arc<AtomicU32>,
    high_water: Arc<AtomicU32>,
}

impl DeferredBus {
    pub fn new(msb: u8, lsb: u8) -> Self {
        Self {
            registers: [0x00, lsb, msb],
            in_flight: Arc::new(AtomicU32::new(0)),
            high_water: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Most transactions ever outstanding at once.
    pub fn high_water(&self) -> u32 {
        self.high_water.load(Ordering::SeqCst)
    }
}

impl BusDriver<'static> for DeferredBus {
    fn init(&mut self, _config: &BusConfig) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_mode(&mut self, _mode: Mode) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_data_width(&mut self, _width: DataWidth) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_word_size(&mut self, _bits: u8) -> Result<(), DriverError> {
        Ok(())
    }

    fn begin_transaction(&mut self, request: &mut TransactionRequest<'static>) {
        let register = usize::from(request.tx[0] & !WRITE_BIT);
        request.rx = [0xFF, self.registers[register]];

        let outstanding = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(outstanding, Ordering::SeqCst);

        let completion = request.completion();
        let in_flight = Arc::clone(&self.in_flight);
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(2));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            completion.complete(0);
        });
    }
}

/// Interrupt line that counts enable/disable calls.
pub struct MockLine {
    enabled: AtomicBool,
    pub enables: AtomicU32,
    pub disables: AtomicU32,
}

impl MockLine {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            enables: AtomicU32::new(0),
            disables: AtomicU32::new(0),
        }
    }

    pub fn enable_count(&self) -> u32 {
        self.enables.load(Ordering::SeqCst)
    }
}

impl InterruptLine for MockLine {
    fn enable(&self) {
        self.enables.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Delay that only records how long it was asked to wait.
pub struct RecordingDelay {
    pub total_ns: u64,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self { total_ns: 0 }
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}

pub struct MockTimer {
    pub configured: Option<TimerConfig>,
    pub running: bool,
    pub interrupt_enabled: bool,
    pub pending_clears: u32,
    pub interrupt_enables: u32,
    pub fail_configure: bool,
}

impl MockTimer {
    pub const fn new() -> Self {
        Self {
            configured: None,
            running: false,
            interrupt_enabled: false,
            pending_clears: 0,
            interrupt_enables: 0,
            fail_configure: false,
        }
    }
}

impl PeriodicTimer for MockTimer {
    fn configure(&mut self, config: &TimerConfig) -> Result<(), DriverError> {
        if self.fail_configure {
            return Err(DriverError::new(-1));
        }
        self.configured = Some(*config);
        Ok(())
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn enable_interrupt(&mut self) {
        self.interrupt_enabled = true;
        self.interrupt_enables += 1;
    }

    fn disable_interrupt(&mut self) {
        self.interrupt_enabled = false;
    }

    fn clear_pending(&mut self) {
        self.pending_clears += 1;
    }
}

/// RTC that reports busy for the first `busy_per_access` attempts of every
/// register access.
pub struct MockRtc {
    pub now: u32,
    pub alarm: Option<u32>,
    pub alarm_interrupt: bool,
    pub alarm_flag: bool,
    pub busy_per_access: u32,
    busy_left: u32,
    pub busy_reports: u32,
    pub interrupt_enables: u32,
}

impl MockRtc {
    pub const fn new(now: u32, busy_per_access: u32) -> Self {
        Self {
            now,
            alarm: None,
            alarm_interrupt: false,
            alarm_flag: false,
            busy_per_access,
            busy_left: busy_per_access,
            busy_reports: 0,
            interrupt_enables: 0,
        }
    }

    fn access<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Result<T, RtcError> {
        if self.busy_left > 0 {
            self.busy_left -= 1;
            self.busy_reports += 1;
            return Err(RtcError::Busy);
        }
        self.busy_left = self.busy_per_access;
        Ok(f(self))
    }
}

impl Rtc for MockRtc {
    fn seconds(&mut self) -> Result<u32, RtcError> {
        self.access(|rtc| rtc.now)
    }

    fn subseconds(&mut self) -> Result<u32, RtcError> {
        self.access(|_| 0)
    }

    fn set_alarm(&mut self, seconds: u32) -> Result<(), RtcError> {
        self.access(|rtc| rtc.alarm = Some(seconds))
    }

    fn enable_alarm_interrupt(&mut self) -> Result<(), RtcError> {
        self.access(|rtc| {
            rtc.alarm_interrupt = true;
            rtc.interrupt_enables += 1;
        })
    }

    fn disable_alarm_interrupt(&mut self) -> Result<(), RtcError> {
        self.access(|rtc| rtc.alarm_interrupt = false)
    }

    fn clear_alarm_flag(&mut self) -> Result<(), RtcError> {
        self.access(|rtc| rtc.alarm_flag = false)
    }
}
