//! System information surface.

use std::sync::Arc;

use crate::engine::AudioEngine;

pub struct SystemController {
    engine: Arc<AudioEngine>,
}

impl SystemController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    pub fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_owned()
    }

    pub fn build_info(&self) -> String {
        format!(
            "{} {} (chunk size {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            crate::buffer::AUDIO_CHUNK_SIZE
        )
    }

    pub fn input_audio_channel_count(&self) -> usize {
        self.engine.input_channel_count()
    }

    pub fn output_audio_channel_count(&self) -> usize {
        self.engine.output_channel_count()
    }

    pub fn set_input_clip_detection(&self, enabled: bool) {
        self.engine.set_input_clip_detection(enabled);
    }

    pub fn set_output_clip_detection(&self, enabled: bool) {
        self.engine.set_output_clip_detection(enabled);
    }
}
