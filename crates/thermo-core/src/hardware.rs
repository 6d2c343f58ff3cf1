//! Bring-up for the bus and the sensor
//!
//! Initialization runs once, before any trigger source is started. Every
//! failure here is fatal: callers report it and [`halt`].

use embedded_hal::digital::StatefulOutputPin;
use log::{error, info, warn};

use crate::config::PollerConfig;
use crate::error::ThermoError;
use crate::peripherals::{BusDriver, DriverError};
use crate::sensors::max31723::{ConfigRegister, Reading, startup_sequence};
use crate::sequencer::Sequencer;

/// Bits of the configuration register that are expected to read back as
/// written. NVB reflects the EEPROM state, not the written value.
const READBACK_MASK: u8 = !ConfigRegister::NVB;

fn initialization(peripheral: &'static str) -> impl Fn(DriverError) -> ThermoError {
    move |e| ThermoError::Initialization {
        peripheral,
        code: e.code,
    }
}

/// Apply the bus settings in `config`: clock and chip select, mode, word size
/// and data width, in that order.
pub fn init_bus<'a, B>(bus: &mut B, config: &PollerConfig) -> Result<(), ThermoError>
where
    B: BusDriver<'a>,
{
    config.validate()?;

    info!("Configuring SPI bus");
    bus.init(&config.bus_config())
        .map_err(initialization("SPI bus"))?;
    bus.set_mode(config.spi_mode()?)
        .map_err(initialization("SPI mode"))?;
    bus.set_word_size(config.bus.word_size)
        .map_err(initialization("SPI word size"))?;
    bus.set_data_width(config.bus.data_width)
        .map_err(initialization("SPI data width"))?;

    info!(
        "SPI bus ready: {} Hz, mode {}, CS{}",
        config.bus.speed_hz, config.bus.spi_mode, config.bus.chip_select
    );
    Ok(())
}

/// Write `config` to the sensor, read it back and take a first reading.
///
/// A read-back that differs from the written value is only logged.
pub fn configure_sensor<'a, B, P>(
    sequencer: &mut Sequencer<'a, B, P>,
    config: ConfigRegister,
) -> Result<Reading, ThermoError>
where
    B: BusDriver<'a>,
    P: StatefulOutputPin,
{
    info!("Configuring MAX31723");
    let reading = sequencer.run_sequence(&startup_sequence(config))?;

    if let Some(readback) = sequencer.last_config() {
        if readback.0 & READBACK_MASK != config.0 & READBACK_MASK {
            warn!(
                "Configuration read back as {} after writing {}",
                readback, config
            );
        }
    }

    info!("Startup Temperature: {}", reading);
    Ok(reading)
}

/// Report `err` and stop.
pub fn halt(err: ThermoError) -> ! {
    error!("Fatal: {}", err);
    loop {
        core::hint::spin_loop();
    }
}

/// Unwrap `result`, halting on error.
pub fn or_halt<T>(result: Result<T, ThermoError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => halt(e),
    }
}
