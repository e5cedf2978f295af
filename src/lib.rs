//! # Jukebox Audio
//!
//! Real-time audio delivery core of a desktop media jukebox.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Pipeline (pipeline)                          │
//! │   main volume · mute · auto volume settings · shared EQ settings     │
//! │                               │ play()                                │
//! │                               ▼                                       │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │            Backend (backend::Backend trait object)             │  │
//! │  │   AudioOut / Prelisten: cpal device     Null: measurement      │  │
//! │  │                                                                │  │
//! │  │   Stream 0           Stream 1           Stream N               │  │
//! │  │   ┌──────────┐       ┌──────────┐       ┌──────────┐           │  │
//! │  │   │ Source   │       │ Source   │       │ Source   │           │  │
//! │  │   │ Decode   │       │ Decode   │       │ Decode   │           │  │
//! │  │   │ thread   │       │ thread   │       │ thread   │           │  │
//! │  │   └────┬─────┘       └────┬─────┘       └────┬─────┘           │  │
//! │  │        │ Dsp callback: Equalizer → VolumeCalc → VolumeFader    │  │
//! │  │        ▼                  ▼                  ▼                 │  │
//! │  │   ┌──────────┐       ┌──────────┐       ┌──────────┐           │  │
//! │  │   │RingBuffer│       │RingBuffer│       │RingBuffer│           │  │
//! │  │   └────┬─────┘       └────┬─────┘       └────┬─────┘           │  │
//! │  │        └──────────────────┼──────────────────┘                 │  │
//! │  │                           ▼                                    │  │
//! │  │              Device callback: mix + device volume              │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! │                               │ VideoDetected / EndOfStream           │
//! │                               ▼                                       │
//! │                     PlayerEvent channel → UI thread                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod eq;
pub mod error;
pub mod pipeline;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate offered to sources when nothing else is known
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Highest channel count any stage accepts
    pub const MAX_CHANNELS: usize = 64;

    /// Frames decoded and passed to the `Dsp` callback at once
    pub const DECODE_CHUNK_FRAMES: usize = 1024;

    /// Default per-stream output buffer length
    pub const DEFAULT_OUTPUT_BUFFER_MS: u32 = 92;

    /// Lower bound for the per-stream output buffer
    pub const MIN_OUTPUT_BUFFER_FRAMES: usize = 4096;

    /// Main volume after start and after unmuting from (near) silence
    pub const DEFAULT_MAIN_VOLUME: u8 = 240;

    /// Unmuting restores the previous volume only above this value
    pub const MUTE_RESTORE_THRESHOLD: u8 = 8;

    /// Fade length of a manual crossfade
    pub const DEFAULT_CROSSFADE_MS: u64 = 10_000;

    /// Auto volume target gain
    pub const DEFAULT_DESIRED_GAIN: f32 = 1.0;

    /// Auto volume gain ceiling (14 dB)
    pub const DEFAULT_MAX_GAIN: f32 = 5.0;
}
