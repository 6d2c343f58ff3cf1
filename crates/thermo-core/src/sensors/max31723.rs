//! MAX31723 SPI digital thermometer
//!
//! Every exchange is two bytes: the register address (with bit 7 set for a
//! write) followed by a data byte. The device latches the address from the
//! first byte, so reads and writes have to be issued one register at a time
//! in a fixed order.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::sequencer::{Purpose, Step};

pub const REG_CONFIG: u8 = 0x00;
pub const REG_TEMP_LSB: u8 = 0x01;
pub const REG_TEMP_MSB: u8 = 0x02;

/// Set on the address byte to write the addressed register.
pub const WRITE_BIT: u8 = 0x80;

/// Conversion resolution, stored in config bits R1:R0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Bits9,
    Bits10,
    Bits11,
    Bits12,
}

impl Resolution {
    const SHIFT: u8 = 1;
    const MASK: u8 = 0b11 << Self::SHIFT;

    const fn config_bits(self) -> u8 {
        let index = match self {
            Self::Bits9 => 0,
            Self::Bits10 => 1,
            Self::Bits11 => 2,
            Self::Bits12 => 3,
        };
        index << Self::SHIFT
    }

    const fn from_config_bits(bits: u8) -> Self {
        match (bits & Self::MASK) >> Self::SHIFT {
            0 => Self::Bits9,
            1 => Self::Bits10,
            2 => Self::Bits11,
            _ => Self::Bits12,
        }
    }

    /// Worst-case conversion time in milliseconds.
    pub const fn conversion_time_ms(self) -> u32 {
        match self {
            Self::Bits9 => 25,
            Self::Bits10 => 50,
            Self::Bits11 => 100,
            Self::Bits12 => 200,
        }
    }

    /// Bits of the LSB register that carry data at this resolution.
    pub const fn lsb_mask(self) -> u8 {
        match self {
            Self::Bits9 => 0x80,
            Self::Bits10 => 0xC0,
            Self::Bits11 => 0xE0,
            Self::Bits12 => 0xF0,
        }
    }
}

/// Contents of the configuration/status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRegister(pub u8);

impl ConfigRegister {
    pub const SHUTDOWN: u8 = 1 << 0;
    pub const THERMOSTAT_INTERRUPT: u8 = 1 << 3;
    pub const ONE_SHOT: u8 = 1 << 4;
    /// Non-volatile memory busy
    pub const NVB: u8 = 1 << 6;

    /// 12-bit, continuous conversion, comparator thermostat.
    pub const CONTINUOUS_12_BIT: Self = Self(0b0100_0110);

    pub const fn resolution(self) -> Resolution {
        Resolution::from_config_bits(self.0)
    }

    pub const fn with_resolution(self, resolution: Resolution) -> Self {
        Self((self.0 & !Resolution::MASK) | resolution.config_bits())
    }

    pub const fn is_shutdown(self) -> bool {
        self.0 & Self::SHUTDOWN != 0
    }
}

impl Default for ConfigRegister {
    fn default() -> Self {
        Self::CONTINUOUS_12_BIT
    }
}

/// Printed as two nibbles, e.g. `0100 0110`.
impl fmt::Display for ConfigRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04b} {:04b}", self.0 >> 4, self.0 & 0x0F)
    }
}

/// A temperature reading assembled from the MSB and LSB registers.
///
/// The MSB holds the integer part in degrees Celsius and the LSB the
/// fraction in 1/256 steps, so `0x19, 0x80` is 25.5 °C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub msb: u8,
    pub lsb: u8,
}

impl Reading {
    pub const fn from_registers(msb: u8, lsb: u8) -> Self {
        Self { msb, lsb }
    }

    /// Fractional part contributed by the LSB register.
    pub fn fraction(&self) -> f32 {
        self.lsb as f32 / 256.0
    }

    /// `MSB + LSB / 256`, with the MSB taken as unsigned.
    pub fn celsius(&self) -> f32 {
        f32::from(self.msb) + self.fraction()
    }

    /// Same as [`celsius`](Self::celsius) but with the MSB read as two's
    /// complement, which is how the device encodes sub-zero temperatures.
    pub fn signed_celsius(&self) -> f32 {
        f32::from(self.msb as i8) + self.fraction()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.celsius())
    }
}

/// Two-step read of the temperature registers, MSB first.
pub const READ_TEMPERATURE: [Step; 2] = [
    Step::read(REG_TEMP_MSB, Purpose::TemperatureMsb),
    Step::read(REG_TEMP_LSB, Purpose::TemperatureLsb),
];

/// Read the configuration register, write `config`, read it back, then take
/// a first temperature reading.
pub const fn startup_sequence(config: ConfigRegister) -> [Step; 5] {
    [
        Step::read(REG_CONFIG, Purpose::ConfigRead),
        Step::write(REG_CONFIG, config.0, Purpose::ConfigWrite),
        Step::read(REG_CONFIG, Purpose::ConfigRead),
        Step::read(REG_TEMP_MSB, Purpose::TemperatureMsb),
        Step::read(REG_TEMP_LSB, Purpose::TemperatureLsb),
    ]
}
