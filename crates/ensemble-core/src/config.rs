//! Engine configuration.

use crate::error::{Error, Result};
use crate::graph::MAX_TRACKS;
use crate::track::TRACK_MAX_CHANNELS;

/// Configuration for the audio engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: f64,
    /// CPU cores used for track rendering.
    pub cpu_cores: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub input_clip_detection: bool,
    pub output_clip_detection: bool,
    pub midi_input_ports: usize,
    pub midi_output_ports: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            cpu_cores: 1,
            input_channels: 2,
            output_channels: 2,
            input_clip_detection: false,
            output_clip_detection: false,
            midi_input_ports: 1,
            midi_output_ports: 1,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000.0 || self.sample_rate > 384000.0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.cpu_cores == 0 || self.cpu_cores > MAX_TRACKS {
            return Err(Error::InvalidConfig(format!(
                "cpu_cores {} out of range (1-{MAX_TRACKS})",
                self.cpu_cores
            )));
        }
        let max_engine_channels = TRACK_MAX_CHANNELS * MAX_TRACKS;
        if self.input_channels > max_engine_channels || self.output_channels > max_engine_channels {
            return Err(Error::InvalidChannelCount(
                self.input_channels.max(self.output_channels),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.cpu_cores, 1);
    }

    #[test]
    fn test_invalid_sample_rate() {
        let config = EngineConfig {
            sample_rate: 1000.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_core_count() {
        let config = EngineConfig {
            cpu_cores: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
