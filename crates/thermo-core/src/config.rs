//! Poller configuration
//!
//! Serialized with `postcard` so a board can keep it in flash and the
//! simulator can load it from a file.

use embedded_hal::spi::{MODE_0, MODE_1, MODE_2, MODE_3, Mode};
use serde::{Deserialize, Serialize};

use crate::dispatch::ServicePolicy;
use crate::error::ThermoError;
use crate::peripherals::{BusConfig, DataWidth};
use crate::sensors::max31723::{ConfigRegister, Resolution};

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub bus: BusSettings,
    pub triggers: TriggerSettings,
    pub sensor: SensorSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    pub speed_hz: u32,
    /// SPI mode number, 0 to 3
    pub spi_mode: u8,
    pub chip_select: u8,
    pub chip_select_active_high: bool,
    pub data_width: DataWidth,
    pub word_size: u8,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            speed_hz: 100_000,
            spi_mode: 3,
            chip_select: 0,
            chip_select_active_high: true,
            data_width: DataWidth::Standard,
            word_size: 8,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSettings {
    pub debounce_ms: u32,
    pub timer_frequency_hz: u32,
    pub timer_prescaler: u32,
    /// Timer periods per posted trigger
    pub timer_threshold: u32,
    pub rtc_interval_secs: u32,
    pub policy: ServicePolicy,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            timer_frequency_hz: 1,
            timer_prescaler: 32,
            timer_threshold: 5,
            rtc_interval_secs: 5,
            policy: ServicePolicy::AllPending,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub resolution: Resolution,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::Bits12,
        }
    }
}

impl PollerConfig {
    /// Decode a configuration blob and validate it.
    pub fn decode(bytes: &[u8]) -> Result<Self, ThermoError> {
        let config: Self = postcard::from_bytes(bytes)
            .map_err(|_| ThermoError::Configuration("malformed configuration blob"))?;
        config.validate()?;
        Ok(config)
    }

    /// Encode into `buf`, returning the used part.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ThermoError> {
        postcard::to_slice(self, buf)
            .map_err(|_| ThermoError::Configuration("configuration buffer too small"))
    }

    pub fn validate(&self) -> Result<(), ThermoError> {
        self.spi_mode()?;
        if self.bus.speed_hz == 0 {
            return Err(ThermoError::Configuration("bus speed must be non-zero"));
        }
        if self.bus.word_size == 0 {
            return Err(ThermoError::Configuration("word size must be non-zero"));
        }
        if self.triggers.timer_frequency_hz == 0 || self.triggers.timer_prescaler == 0 {
            return Err(ThermoError::Configuration(
                "timer frequency and prescaler must be non-zero",
            ));
        }
        if self.triggers.timer_threshold == 0 {
            return Err(ThermoError::Configuration("timer threshold must be non-zero"));
        }
        if self.triggers.rtc_interval_secs == 0 {
            return Err(ThermoError::Configuration("RTC interval must be non-zero"));
        }
        Ok(())
    }

    pub fn spi_mode(&self) -> Result<Mode, ThermoError> {
        match self.bus.spi_mode {
            0 => Ok(MODE_0),
            1 => Ok(MODE_1),
            2 => Ok(MODE_2),
            3 => Ok(MODE_3),
            _ => Err(ThermoError::Configuration("SPI mode must be 0 to 3")),
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            speed_hz: self.bus.speed_hz,
            chip_select: self.bus.chip_select,
            chip_select_active_high: self.bus.chip_select_active_high,
        }
    }

    /// Configuration register value written during bring-up.
    pub fn sensor_config(&self) -> ConfigRegister {
        ConfigRegister::CONTINUOUS_12_BIT.with_resolution(self.sensor.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_demo_board() {
        let config = PollerConfig::default();
        assert_eq!(config.spi_mode(), Ok(MODE_3));
        assert_eq!(config.bus_config().speed_hz, 100_000);
        assert!(config.bus_config().chip_select_active_high);
        assert_eq!(config.sensor_config(), ConfigRegister(0b0100_0110));
        assert_eq!(config.triggers.debounce_ms, 100);
        assert_eq!(config.triggers.timer_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_encoded_config_decodes() {
        let mut config = PollerConfig::default();
        config.triggers.policy = ServicePolicy::OnePerPass;
        config.sensor.resolution = Resolution::Bits9;

        let mut buf = [0u8; 64];
        let bytes = config.encode(&mut buf).unwrap();
        let decoded = PollerConfig::decode(bytes).unwrap();

        assert_eq!(decoded, config);
        assert_eq!(decoded.sensor_config().resolution(), Resolution::Bits9);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(PollerConfig::decode(&[0xFF]).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_values() {
        let mut config = PollerConfig::default();
        config.bus.spi_mode = 7;
        let mut buf = [0u8; 64];
        let bytes = config.encode(&mut buf).unwrap();

        assert_eq!(
            PollerConfig::decode(bytes),
            Err(ThermoError::Configuration("SPI mode must be 0 to 3"))
        );
    }

    #[test]
    fn test_encode_into_short_buffer_fails() {
        let mut buf = [0u8; 2];
        assert!(PollerConfig::default().encode(&mut buf).is_err());
    }
}
