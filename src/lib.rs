//! ensemble: a headless, multicore plugin host.
//!
//! The host ingests audio and MIDI from backend endpoints, routes the
//! streams through a runtime-configurable graph of tracks and processors,
//! and emits processed audio, MIDI and parameter telemetry. External clients
//! drive it through the controller command surfaces.
//!
//! # Example
//!
//! ```
//! use ensemble::prelude::*;
//!
//! let host = EnsembleHost::builder()
//!     .sample_rate(48000.0)
//!     .audio_channels(2, 2)
//!     .build()?;
//!
//! let track = host.controller().audio_graph.create_track("main", 2).unwrap();
//! host.controller().audio_routing.connect_input_channel_to_track(0, 0, track);
//! host.controller().audio_routing.connect_track_to_output_channel(0, 0, track);
//!
//! let input = vec![0.0f32; 64 * 2];
//! let mut output = vec![0.0f32; 64 * 2];
//! host.process(&input, &mut output)?;
//! # Ok::<(), ensemble::Error>(())
//! ```

mod builder;
mod host;

pub use builder::EnsembleHostBuilder;
pub use host::EnsembleHost;

pub use ensemble_core::{
    AudioEngine, ControlStatus, Controller, EngineConfig, Error, MidiDispatcher, Notification,
    NotificationKind, ObjectId, PlayingMode, PluginBackend, PluginInfo, PluginInstance,
    ProcessorState, Result, RtEvent, SyncMode, TimeSignature, AUDIO_CHUNK_SIZE,
};

pub mod prelude {
    //! Everything needed to stand up and drive a host.
    pub use crate::{EnsembleHost, EnsembleHostBuilder};
    pub use ensemble_core::{
        ControlStatus, EngineConfig, Error, Notification, NotificationKind, ObjectId, PlayingMode,
        PluginInfo, ProcessorState, Result, SyncMode, TimeSignature, AUDIO_CHUNK_SIZE,
    };
}
