//! Realtime core of the ensemble host.
//!
//! A headless, pluggable audio processing host: tracks and processors form a
//! graph rendered chunk by chunk across CPU cores, a lock-free event bridge
//! connects the realtime world to the controller world, and a named command
//! surface mutates the graph at runtime without breaking realtime safety.
//!
//! # Primary API
//!
//! - [`AudioEngine`]: block processing, graph mutation, transport control
//! - [`Controller`]: the named command surfaces for external clients
//! - [`EventDispatcher`]: the non-realtime bridge thread
//! - [`MidiDispatcher`]: MIDI routing tables and conversion
//!
//! # Example
//!
//! ```
//! use ensemble_core::{AudioEngine, EngineConfig};
//! use ensemble_core::buffer::AUDIO_CHUNK_SIZE;
//!
//! let engine = AudioEngine::new(EngineConfig::default())?;
//! let track = engine.create_track("main", 2)?;
//! engine.connect_audio_input_bus(0, 0, track)?;
//! engine.connect_audio_output_bus(0, 0, track)?;
//!
//! let input = vec![0.0f32; AUDIO_CHUNK_SIZE * 2];
//! let mut output = vec![0.0f32; AUDIO_CHUNK_SIZE * 2];
//! engine.process(&input, &mut output)?;
//! # Ok::<(), ensemble_core::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod types;
pub use types::{ControlStatus, ObjectId, PlayingMode, StateChange, SyncMode, TimeSignature};

pub mod buffer;
pub use buffer::{SampleBuffer, AUDIO_CHUNK_SIZE};

pub mod event;
pub use event::{MidiData, RtEvent, RtEventPayload};

pub mod fifo;
pub use fifo::{RtEventFifo, RtEventQueue};

pub mod smooth;
pub use smooth::{BlockSmoother, SmoothedValue};

pub mod parameter;
pub use parameter::{
    ParameterDescriptor, ParameterRange, ParameterScale, ParameterStore, ParameterType,
    PropertyDescriptor,
};

pub mod processor;
pub use processor::{bypass_passthrough, Processor, ProcessorData, ProcessorHandle};

pub mod state;
pub use state::ProcessorState;

pub mod internal;
pub use internal::{GainProcessor, InternalProcessorFactory, PassthroughProcessor};

pub mod plugin;
pub use plugin::{PluginBackend, PluginInstance, PluginParameterInfo, PluginProcessor};

pub mod track;
pub use track::{Track, TrackHandle, TRACK_MAX_BUSSES, TRACK_MAX_CHANNELS, TRACK_MAX_PROCESSORS};

pub mod graph;
pub use graph::{AudioGraph, MAX_TRACKS};

pub mod transport;
pub use transport::{SyncInput, Transport, TransportView};

pub mod timings;
pub use timings::{ProcessTimings, TimingLog, TimingRegistry, ENGINE_TIMING_ID};

pub mod connections;
pub use connections::{AudioConnection, ConnectionTable};

pub mod registry;
pub use registry::{GraphNode, ProcessorRegistry};

pub mod midi;
pub use midi::{
    decode_midi, CcInputConnection, KbdInputConnection, KbdOutputConnection, MidiDispatcher,
    MidiMessage, MidiOutputSink, PcInputConnection,
};

pub mod notifications;
pub use notifications::{
    GraphChange, Notification, NotificationHub, NotificationKind, Subscription,
};

pub mod dispatcher;
pub use dispatcher::{
    next_returnable_id, CompletionListener, DispatcherContext, EventDispatcher,
    DEFAULT_COMMAND_TIMEOUT,
};

pub mod engine;
pub use engine::{AudioEngine, PluginInfo, RealtimeState};

pub mod config;
pub use config::EngineConfig;

pub mod controller;
pub use controller::{
    AudioGraphController, AudioRoutingController, CommandResult, Controller, KeyboardController,
    MidiController, NotificationController, ParameterController, ProcessorInfo, ProgramController,
    PropertyInfo, SystemController, TimingController, TrackInfo, TransportController,
};
pub use controller::ParameterInfo;
