//! Controller command surfaces.
//!
//! A set of stateless facades over the engine, registry and MIDI dispatcher.
//! Mutating commands return a [`ControlStatus`]; queries return
//! `Result<payload, ControlStatus>`.

mod audio_graph;
mod audio_routing;
mod keyboard;
mod midi;
mod notification;
mod parameters;
mod programs;
mod system;
mod timing;
mod transport;

pub use audio_graph::AudioGraphController;
pub use audio_routing::AudioRoutingController;
pub use keyboard::KeyboardController;
pub use midi::MidiController;
pub use notification::NotificationController;
pub use parameters::ParameterController;
pub use programs::ProgramController;
pub use system::SystemController;
pub use timing::TimingController;
pub use transport::TransportController;

use std::sync::Arc;

use crate::engine::AudioEngine;
use crate::error::Error;
use crate::midi::MidiDispatcher;
use crate::parameter::ParameterType;
use crate::types::{ControlStatus, ObjectId};

/// Query result: payload or failure status.
pub type CommandResult<T> = std::result::Result<T, ControlStatus>;

/// Map an internal error onto the controller status taxonomy.
pub(crate) fn status_from_error(error: &Error) -> ControlStatus {
    match error {
        Error::NotFound(_) => ControlStatus::NotFound,
        Error::InvalidChannelCount(_) => ControlStatus::OutOfRange,
        Error::InvalidName(_) | Error::InvalidBufferSize(_) | Error::CorruptState(_) => {
            ControlStatus::InvalidArguments
        }
        Error::RtTimeout => ControlStatus::Timeout,
        Error::QueueFull
        | Error::ShuttingDown
        | Error::Backend(_)
        | Error::InvalidConfig(_) => ControlStatus::Error,
    }
}

pub(crate) fn status_from_result(result: crate::error::Result<()>) -> ControlStatus {
    match result {
        Ok(()) => ControlStatus::Ok,
        Err(error) => status_from_error(&error),
    }
}

/// Static description of a processor for controller clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub parameter_count: usize,
    pub program_count: usize,
}

/// Static description of a track for controller clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub input_busses: usize,
    pub output_busses: usize,
    pub processors: Vec<ObjectId>,
}

/// Static description of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub unit: String,
    pub kind: ParameterType,
    pub min_domain_value: f32,
    pub max_domain_value: f32,
    pub automatable: bool,
}

/// Static description of one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
}

/// The composed controller: one named surface per concern.
pub struct Controller {
    pub system: SystemController,
    pub transport: TransportController,
    pub timings: TimingController,
    pub keyboard: KeyboardController,
    pub audio_graph: AudioGraphController,
    pub parameters: ParameterController,
    pub programs: ProgramController,
    pub midi: MidiController,
    pub audio_routing: AudioRoutingController,
    pub notifications: NotificationController,
}

impl Controller {
    pub fn new(engine: Arc<AudioEngine>, midi: Arc<MidiDispatcher>) -> Self {
        Self {
            system: SystemController::new(engine.clone()),
            transport: TransportController::new(engine.clone()),
            timings: TimingController::new(engine.clone()),
            keyboard: KeyboardController::new(engine.clone()),
            audio_graph: AudioGraphController::new(engine.clone()),
            parameters: ParameterController::new(engine.clone()),
            programs: ProgramController::new(engine.clone()),
            midi: MidiController::new(engine.clone(), midi),
            audio_routing: AudioRoutingController::new(engine.clone()),
            notifications: NotificationController::new(engine),
        }
    }
}
