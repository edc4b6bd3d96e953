//! Detector configuration
//!
//! Defaults are the build-time constants for the target device. The service
//! binary may load overrides from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Raw retention ceiling: two seconds of 16kHz mono PCM16
pub const RAW_RETENTION_BYTES: usize = 64_000;

/// Compressed retention ceiling
pub const PACKET_RETENTION_BYTES: usize = 16_384;

/// Duration of one compressed packet
pub const PACKET_FRAME_DURATION_MS: u32 = 60;

pub const DETECTION_STACK_SIZE: usize = 256 * 1024;
pub const ENCODE_STACK_SIZE: usize = 256 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Interleaved channels per transport sample frame, reference included
    pub channels: usize,

    /// Last channel carries the playback reference for echo cancellation
    pub reference_channel: bool,

    pub raw_retention_bytes: usize,

    pub packet_retention_bytes: usize,

    pub packet_frame_duration_ms: u32,

    pub detection_stack_size: usize,

    pub encode_stack_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            reference_channel: false,
            raw_retention_bytes: RAW_RETENTION_BYTES,
            packet_retention_bytes: PACKET_RETENTION_BYTES,
            packet_frame_duration_ms: PACKET_FRAME_DURATION_MS,
            detection_stack_size: DETECTION_STACK_SIZE,
            encode_stack_size: ENCODE_STACK_SIZE,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 {
            return Err(ConfigError::Invalid("channels must be greater than 0".to_string()));
        }

        if self.reference_channel && self.channels < 2 {
            return Err(ConfigError::Invalid(
                "a reference channel needs at least one microphone channel".to_string(),
            ));
        }

        if self.raw_retention_bytes == 0 || self.packet_retention_bytes == 0 {
            return Err(ConfigError::Invalid(
                "retention ceilings must be greater than 0".to_string(),
            ));
        }

        let ms = self.packet_frame_duration_ms;
        if ms == 0 || ms > 120 || ms % 10 != 0 {
            return Err(ConfigError::Invalid(format!(
                "packet frame duration must be a multiple of 10ms up to 120ms, got {}ms",
                ms
            )));
        }

        Ok(())
    }

    /// Microphone channels, excluding the reference
    pub fn mic_channels(&self) -> usize {
        self.channels - usize::from(self.reference_channel)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_valid() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mic_channels(), 1);
    }

    #[test]
    fn test_validation() {
        let mut config = DetectorConfig::default();
        config.channels = 0;
        assert!(config.validate().is_err());

        config.channels = 1;
        config.reference_channel = true;
        assert!(config.validate().is_err());

        config.channels = 3;
        assert!(config.validate().is_ok());
        assert_eq!(config.mic_channels(), 2);

        config.packet_frame_duration_ms = 25;
        assert!(config.validate().is_err());

        config.packet_frame_duration_ms = 20;
        config.raw_retention_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DetectorConfig =
            serde_json::from_str(r#"{ "channels": 2, "reference_channel": true }"#).unwrap();
        assert_eq!(config.channels, 2);
        assert!(config.reference_channel);
        assert_eq!(config.raw_retention_bytes, RAW_RETENTION_BYTES);
        assert_eq!(config.packet_frame_duration_ms, PACKET_FRAME_DURATION_MS);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "raw_retention_bytes": 32000 }}"#).unwrap();

        let config = DetectorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.raw_retention_bytes, 32_000);
        assert_eq!(config.channels, 1);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channels": 0 }}"#).unwrap();
        assert!(matches!(
            DetectorConfig::from_json_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        write!(garbage, "not json").unwrap();
        assert!(matches!(
            DetectorConfig::from_json_file(garbage.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
