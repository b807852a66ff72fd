//! Error types for ensemble-core.

use thiserror::Error;

/// Error type for ensemble-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid processor name: {0:?}")]
    InvalidName(String),

    #[error("Processor or track not found: {0}")]
    NotFound(String),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("Engine buffer size {0} is not a multiple of the chunk size")]
    InvalidBufferSize(usize),

    #[error("Realtime queue full")]
    QueueFull,

    #[error("Realtime thread did not respond in time")]
    RtTimeout,

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Plugin backend error: {0}")]
    Backend(String),

    #[error("Corrupt processor state: {0}")]
    CorruptState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
