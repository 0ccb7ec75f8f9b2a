//! Machine configuration.

use serde::{Deserialize, Serialize};
use sinclair_ula::{DisplayTimings, TimingError};
use thiserror::Error;

use crate::tape::TapeConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid display timings: {0}")]
    Timing(#[from] TimingError),
    #[error("CPU frequency must be positive, got {0} MHz")]
    InvalidCpuFrequency(f64),
}

/// Configuration for creating a [`Spectrum48`](crate::Spectrum48).
///
/// Every field has a 48K PAL default, so a TOML file only needs the values
/// it changes:
///
/// ```toml
/// cpu_frequency_mhz = 3.5
///
/// [display]
/// flash_toggle_frames = 16
///
/// [tape]
/// save_silence_tacts = 7_000_000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub display: DisplayTimings,
    pub cpu_frequency_mhz: f64,
    pub tape: TapeConfig,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            display: DisplayTimings::default(),
            cpu_frequency_mhz: 3.5,
            tape: TapeConfig::default(),
        }
    }
}

impl SpectrumConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cpu_frequency_mhz.is_finite() || self.cpu_frequency_mhz <= 0.0 {
            return Err(ConfigError::InvalidCpuFrequency(self.cpu_frequency_mhz));
        }
        self.display.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = SpectrumConfig::from_toml_str("").expect("empty TOML is valid");
        assert_eq!(config, SpectrumConfig::default());
        assert_eq!(config.display.frame_tacts, 69_888);
        assert_eq!(config.tape.load_start_address, 0x056C);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = SpectrumConfig::from_toml_str(
            "cpu_frequency_mhz = 3.5469\n\
             [display]\n\
             flash_toggle_frames = 16\n\
             [tape]\n\
             error_address = 0x0010\n",
        )
        .expect("valid config");
        assert!((config.cpu_frequency_mhz - 3.5469).abs() < 1e-9);
        assert_eq!(config.display.flash_toggle_frames, 16);
        assert_eq!(config.display.display_lines, 192);
        assert_eq!(config.tape.error_address, 0x0010);
        assert_eq!(config.tape.save_bytes_address, 0x04C2);
    }

    #[test]
    fn inconsistent_frame_length_is_rejected() {
        let err = SpectrumConfig::from_toml_str("[display]\nframe_tacts = 70000\n")
            .expect_err("frame length does not match the lines");
        assert!(matches!(
            err,
            ConfigError::Timing(TimingError::FrameLengthMismatch { .. })
        ));
    }

    #[test]
    fn huge_timing_values_are_an_error() {
        let err = SpectrumConfig::from_toml_str("[display]\nhorizontal_blanking_time = 4294967295\n")
            .expect_err("line time does not fit");
        assert!(matches!(
            err,
            ConfigError::Timing(TimingError::GeometryOverflow(_))
        ));
    }

    #[test]
    fn bad_cpu_frequency_is_rejected() {
        let err = SpectrumConfig::from_toml_str("cpu_frequency_mhz = 0.0")
            .expect_err("zero clock");
        assert!(matches!(err, ConfigError::InvalidCpuFrequency(_)));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let err = SpectrumConfig::from_toml_str("display = 5").expect_err("wrong type");
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
