//! Error types for the audio delivery core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Equalizer error: {0}")]
    Equalizer(#[from] EqError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ring buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("Buffer is not allocated")]
    NotAllocated,

    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),
}

/// Backend and stream errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device: {0}")]
    DeviceOpen(String),

    #[error("Unsupported locator: {0}")]
    UnsupportedLocator(String),

    #[error("Invalid locator {locator}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Cannot close device, {0} stream(s) still active")]
    StreamsActive(usize),

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::backend::DeviceState,
        to: crate::backend::DeviceState,
    },

    #[error("Failed to spawn thread: {0}")]
    Thread(String),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
}

/// Equalizer parameter and preset errors
#[derive(Error, Debug)]
pub enum EqError {
    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Invalid preset name")]
    InvalidPresetName,

    #[error("Unrecognized equalizer file: {0}")]
    UnrecognizedFile(String),

    #[error("Failed to persist presets: {0}")]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
