//! Sample-level building blocks: buffering, fading and loudness

pub mod buffer;
pub mod fader;
pub mod volcalc;
pub mod wave;

pub use buffer::{create_shared_buffer, RingBuffer, SharedRingBuffer};
pub use fader::VolumeFader;
pub use volcalc::VolumeCalc;
