//! Desktop simulator for the thermo polling engine.
//!
//! Runs the thermo-core dispatch loop against simulated peripherals: a
//! MAX31723 with a slowly drifting temperature behind an SPI bus that
//! completes from a separate "IRQ" thread, a push button on stdin, a periodic
//! timer thread and an RTC with busy windows and a one-shot alarm.
//!
//! # Usage
//!
//! ```text
//! thermo-simulator [CONFIG]                 run, optionally with a postcard config blob
//! thermo-simulator --write-config PATH      write the default config blob and exit
//! ```
//!
//! # Console input
//!
//! | Input       | Action        |
//! |-------------|---------------|
//! | Enter       | Press button  |
//! | q + Enter   | Quit          |

use std::convert::Infallible;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin, StatefulOutputPin};
use embedded_hal::spi::Mode;
use log::{debug, error, info, warn};
use static_cell::StaticCell;

use thermo_core::bus::{CompletionStatus, TransactionRequest};
use thermo_core::hardware::{configure_sensor, init_bus, or_halt};
use thermo_core::peripherals::{
    BusConfig, BusDriver, DataWidth, DriverError, InterruptLine, PeriodicTimer, Rtc, RtcError,
    TimerConfig,
};
use thermo_core::sensors::ConfigRegister;
use thermo_core::sensors::max31723::{REG_TEMP_MSB, WRITE_BIT};
use thermo_core::triggers::{ButtonSource, RtcAlarmSource, TimerSource};
use thermo_core::{Dispatcher, PollerConfig, Sequencer, ThermoError, TriggerSource};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Input clock of the simulated timer peripheral.
const SIM_CLOCK_HZ: u32 = 60_000_000;

/// Time the simulated bus takes before raising its completion interrupt.
const SPI_TRANSFER_TIME: Duration = Duration::from_micros(200);

/// The RTC reports busy during the first part of every second.
const RTC_BUSY_WINDOW_MS: u32 = 20;

/// How often the RTC thread checks for an alarm match.
const RTC_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pause between dispatch passes that found nothing to do.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

const E_NOT_SUPPORTED: i32 = -4;

static DONE: CompletionStatus = CompletionStatus::new();
static QUIT: AtomicBool = AtomicBool::new(false);

// ---------------------------------------------------------------------------
// Simulated MAX31723 and SPI bus
// ---------------------------------------------------------------------------

/// Register file of the simulated sensor.
struct SimSensor {
    registers: [u8; 3],
    started: Instant,
}

impl SimSensor {
    fn new() -> Self {
        Self {
            registers: [ConfigRegister::CONTINUOUS_12_BIT.0, 0, 0],
            started: Instant::now(),
        }
    }

    /// Latch a fresh conversion into the temperature registers.
    fn convert(&mut self) {
        let t = self.started.elapsed().as_secs_f64();

        // 20–26 °C sinusoidal with slow drift
        let celsius = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();

        let raw = (celsius * 256.0) as i16;
        let resolution = ConfigRegister(self.registers[0]).resolution();
        self.registers[2] = (raw >> 8) as u8;
        self.registers[1] = (raw as u8) & resolution.lsb_mask();
    }

    /// Handle one two-byte exchange and return the byte clocked out.
    fn exchange(&mut self, tx: [u8; 2]) -> u8 {
        let register = usize::from(tx[0] & !WRITE_BIT);
        if register >= self.registers.len() {
            return 0xFF;
        }
        if tx[0] & WRITE_BIT != 0 {
            // Only the config register is writable
            if register == 0 {
                self.registers[0] = tx[1];
            }
            return 0xFF;
        }
        if tx[0] == REG_TEMP_MSB {
            self.convert();
        }
        self.registers[register]
    }
}

/// SPI bus whose completion interrupt is raised by a separate thread.
struct SimBus {
    sensor: SimSensor,
    irq: Sender<&'static CompletionStatus>,
}

impl SimBus {
    fn new(irq: Sender<&'static CompletionStatus>) -> Self {
        Self {
            sensor: SimSensor::new(),
            irq,
        }
    }
}

impl BusDriver<'static> for SimBus {
    fn init(&mut self, config: &BusConfig) -> Result<(), DriverError> {
        debug!(
            "SimBus: {} Hz, CS{} active {}",
            config.speed_hz,
            config.chip_select,
            if config.chip_select_active_high { "high" } else { "low" }
        );
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode) -> Result<(), DriverError> {
        debug!("SimBus: {:?}", mode);
        Ok(())
    }

    fn set_data_width(&mut self, width: DataWidth) -> Result<(), DriverError> {
        match width {
            DataWidth::Standard => Ok(()),
            _ => Err(DriverError::new(E_NOT_SUPPORTED)),
        }
    }

    fn set_word_size(&mut self, bits: u8) -> Result<(), DriverError> {
        if bits == 8 {
            Ok(())
        } else {
            Err(DriverError::new(E_NOT_SUPPORTED))
        }
    }

    fn begin_transaction(&mut self, request: &mut TransactionRequest<'static>) {
        request.rx = [0xFF, self.sensor.exchange(request.tx)];
        if self.irq.send(request.completion()).is_err() {
            // IRQ thread gone, fail the transfer rather than spin forever
            request.completion().complete(-1);
        }
    }
}

/// Stand-in for the SPI completion interrupt.
fn spi_irq_thread(pending: Receiver<&'static CompletionStatus>) {
    for completion in pending {
        std::thread::sleep(SPI_TRANSFER_TIME);
        completion.complete(0);
    }
}

// ---------------------------------------------------------------------------
// GPIO
// ---------------------------------------------------------------------------

/// Output pin that logs its level changes.
struct SimLed {
    name: &'static str,
    high: bool,
}

impl SimLed {
    const fn new(name: &'static str) -> Self {
        Self { name, high: false }
    }
}

impl ErrorType for SimLed {
    type Error = Infallible;
}

impl OutputPin for SimLed {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.high = true;
        Ok(())
    }
}

impl StatefulOutputPin for SimLed {
    fn is_set_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.high)
    }

    fn is_set_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.high)
    }

    fn toggle(&mut self) -> Result<(), Infallible> {
        self.high = !self.high;
        debug!("{} LED {}", self.name, if self.high { "on" } else { "off" });
        Ok(())
    }
}

/// Button interrupt line.
struct SimLine {
    enabled: AtomicBool,
}

impl SimLine {
    const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

impl InterruptLine for SimLine {
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Every line on stdin is a falling edge; `q` quits.
fn button_thread(button: &'static ButtonSource<SimLine, SimLed>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }
        if button.line().is_enabled() {
            button.on_falling_edge(&mut StdDelay);
        } else {
            info!("Button interrupt masked, press ignored");
        }
    }
    QUIT.store(true, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

struct SimTimer {
    config: Option<TimerConfig>,
    running: bool,
    interrupt_enabled: bool,
}

impl SimTimer {
    const fn new() -> Self {
        Self {
            config: None,
            running: false,
            interrupt_enabled: false,
        }
    }

    fn period(&self) -> Option<Duration> {
        let config = self.config?;
        let ticks = u64::from(config.compare_count) * u64::from(config.prescaler);
        Some(Duration::from_nanos(
            ticks * 1_000_000_000 / u64::from(config.clock_hz),
        ))
    }
}

impl PeriodicTimer for SimTimer {
    fn configure(&mut self, config: &TimerConfig) -> Result<(), DriverError> {
        if config.clock_hz != SIM_CLOCK_HZ {
            return Err(DriverError::new(E_NOT_SUPPORTED));
        }
        self.config = Some(*config);
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
    }

    fn disable_interrupt(&mut self) {
        self.interrupt_enabled = false;
    }

    fn clear_pending(&mut self) {}
}

fn timer_thread(timer: &'static TimerSource<SimTimer, SimLed>) {
    let Some(period) = timer.with_timer(|t| t.period()) else {
        return;
    };
    let mut next = Instant::now() + period;
    while !QUIT.load(Ordering::SeqCst) {
        std::thread::sleep(next.saturating_duration_since(Instant::now()));
        next += period;

        if timer.with_timer(|t| t.running && t.interrupt_enabled) {
            timer.on_interrupt();
        }
    }
}

// ---------------------------------------------------------------------------
// RTC
// ---------------------------------------------------------------------------

struct SimRtc {
    started: Instant,
    alarm: Option<u32>,
    alarm_interrupt: bool,
    alarm_flag: bool,
}

impl SimRtc {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            alarm: None,
            alarm_interrupt: false,
            alarm_flag: false,
        }
    }

    fn check_busy(&self) -> Result<(), RtcError> {
        if self.started.elapsed().subsec_millis() < RTC_BUSY_WINDOW_MS {
            Err(RtcError::Busy)
        } else {
            Ok(())
        }
    }

    /// Latch the alarm flag on a match and report whether the interrupt fires.
    fn alarm_due(&mut self) -> bool {
        let now = self.started.elapsed().as_secs() as u32;
        if self.alarm.is_some_and(|alarm| now >= alarm) {
            self.alarm_flag = true;
        }
        self.alarm_flag && self.alarm_interrupt
    }
}

impl Rtc for SimRtc {
    fn seconds(&mut self) -> Result<u32, RtcError> {
        self.check_busy()?;
        Ok(self.started.elapsed().as_secs() as u32)
    }

    fn subseconds(&mut self) -> Result<u32, RtcError> {
        self.check_busy()?;
        Ok(self.started.elapsed().subsec_millis())
    }

    fn set_alarm(&mut self, seconds: u32) -> Result<(), RtcError> {
        self.check_busy()?;
        self.alarm = Some(seconds);
        Ok(())
    }

    fn enable_alarm_interrupt(&mut self) -> Result<(), RtcError> {
        self.check_busy()?;
        self.alarm_interrupt = true;
        Ok(())
    }

    fn disable_alarm_interrupt(&mut self) -> Result<(), RtcError> {
        self.check_busy()?;
        self.alarm_interrupt = false;
        Ok(())
    }

    fn clear_alarm_flag(&mut self) -> Result<(), RtcError> {
        self.check_busy()?;
        self.alarm_flag = false;
        Ok(())
    }
}

fn rtc_thread(rtc: &'static RtcAlarmSource<SimRtc, SimLed>) {
    while !QUIT.load(Ordering::SeqCst) {
        std::thread::sleep(RTC_POLL_INTERVAL);
        if rtc.with_rtc(|r| r.alarm_due()) {
            rtc.on_alarm();
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

enum Command {
    Run(PollerConfig),
    WriteConfig(String),
}

fn parse_args() -> Result<Command, String> {
    let mut args = std::env::args().skip(1);
    match args.next() {
        None => Ok(Command::Run(PollerConfig::default())),
        Some(flag) if flag == "--write-config" => args
            .next()
            .map(Command::WriteConfig)
            .ok_or_else(|| "--write-config needs a path".to_string()),
        Some(path) => {
            let bytes = std::fs::read(&path).map_err(|e| format!("{}: {}", path, e))?;
            let config = PollerConfig::decode(&bytes).map_err(|e| format!("{}: {}", path, e))?;
            info!("Loaded configuration from {}", path);
            Ok(Command::Run(config))
        }
    }
}

fn write_config(path: &str) -> Result<(), String> {
    let mut buf = [0u8; 64];
    let bytes = PollerConfig::default()
        .encode(&mut buf)
        .map_err(|e| e.to_string())?;
    std::fs::write(path, &bytes[..]).map_err(|e| format!("{}: {}", path, e))?;
    info!("Wrote default configuration ({} bytes) to {}", bytes.len(), path);
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match parse_args() {
        Ok(Command::Run(config)) => config,
        Ok(Command::WriteConfig(path)) => {
            if let Err(e) = write_config(&path) {
                error!("{}", e);
                std::process::exit(1);
            }
            return;
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Starting thermo simulator");
    info!("Keys: Enter=Button  q+Enter=Quit");

    // SPI bus and sensor
    let (irq_tx, irq_rx) = mpsc::channel();
    std::thread::spawn(move || spi_irq_thread(irq_rx));

    let mut bus = SimBus::new(irq_tx);
    or_halt(init_bus(&mut bus, &config));

    let mut sequencer = Sequencer::new(bus, &DONE, config.bus.chip_select)
        .with_heartbeat(SimLed::new("heartbeat"));
    info!("Sensor resolution: {:?}", config.sensor.resolution);
    or_halt(configure_sensor(&mut sequencer, config.sensor_config()));

    // Trigger sources
    static BUTTON: StaticCell<ButtonSource<SimLine, SimLed>> = StaticCell::new();
    let button: &'static _ = BUTTON.init(ButtonSource::new_with_indicator(
        SimLine::new(),
        SimLed::new("button"),
        config.triggers.debounce_ms,
    ));

    static TIMER: StaticCell<TimerSource<SimTimer, SimLed>> = StaticCell::new();
    let timer: &'static _ = TIMER.init(TimerSource::new_with_indicator(
        SimTimer::new(),
        SimLed::new("timer"),
        config.triggers.timer_threshold,
    ));
    let timer_config = TimerConfig::for_frequency(
        SIM_CLOCK_HZ,
        config.triggers.timer_prescaler,
        config.triggers.timer_frequency_hz,
    )
    .ok_or(ThermoError::Configuration("timer frequency out of range"));
    or_halt(timer_config.and_then(|c| timer.start(&c)));

    static RTC: StaticCell<RtcAlarmSource<SimRtc, SimLed>> = StaticCell::new();
    let rtc: &'static _ = RTC.init(RtcAlarmSource::new(
        SimRtc::new(),
        SimLed::new("status"),
        config.triggers.rtc_interval_secs,
    ));
    or_halt(rtc.start());

    let mut dispatcher = Dispatcher::new(sequencer, config.triggers.policy);
    let sources: [&'static dyn TriggerSource; 3] = [button, timer, rtc];
    for source in sources {
        or_halt(dispatcher.add_source(source));
    }

    std::thread::spawn(move || button_thread(button));
    std::thread::spawn(move || timer_thread(timer));
    std::thread::spawn(move || rtc_thread(rtc));

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    while !QUIT.load(Ordering::SeqCst) {
        if dispatcher.poll().is_empty() {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    for source in sources {
        if let Err(e) = source.disarm() {
            warn!("{}: disarm failed: {}", source.kind(), e);
        }
    }
    timer.stop();

    info!("Simulator exiting");
}
