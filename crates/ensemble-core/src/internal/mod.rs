//! Built-in processor library.
//!
//! Internal units are created by uid through [`InternalProcessorFactory`],
//! the non-plugin arm of processor creation.

mod gain;
mod passthrough;

pub use gain::GainProcessor;
pub use passthrough::PassthroughProcessor;

use crate::error::{Error, Result};
use crate::processor::Processor;

pub const GAIN_UID: &str = "ensemble.gain";
pub const PASSTHROUGH_UID: &str = "ensemble.passthrough";

/// Factory for the internal processor library.
#[derive(Default)]
pub struct InternalProcessorFactory;

impl InternalProcessorFactory {
    pub fn new() -> Self {
        Self
    }

    /// True if `uid` names an internal unit.
    pub fn supports(&self, uid: &str) -> bool {
        matches!(uid, GAIN_UID | PASSTHROUGH_UID)
    }

    pub fn create(&self, uid: &str, sample_rate: f64) -> Result<Box<dyn Processor>> {
        match uid {
            GAIN_UID => Ok(Box::new(GainProcessor::new(sample_rate))),
            PASSTHROUGH_UID => Ok(Box::new(PassthroughProcessor::new())),
            _ => Err(Error::NotFound(format!("no internal processor with uid {uid:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_creates_known_uids() {
        let factory = InternalProcessorFactory::new();
        assert!(factory.supports(GAIN_UID));
        assert!(factory.supports(PASSTHROUGH_UID));
        assert!(factory.create(GAIN_UID, 48000.0).is_ok());
        assert!(factory.create(PASSTHROUGH_UID, 48000.0).is_ok());
    }

    #[test]
    fn test_factory_rejects_unknown_uid() {
        let factory = InternalProcessorFactory::new();
        assert!(!factory.supports("ensemble.unknown"));
        assert!(factory.create("ensemble.unknown", 48000.0).is_err());
    }
}
