//! Graphic equalizer: parameters, filters and presets

pub mod equalizer;
pub mod filter;
pub mod param;
pub mod preset;

pub use equalizer::{EqSettings, Equalizer};
pub use param::{EqParam, Typical10Band, BAND_NAMES, EQ_BANDS, EQ_BAND_MAX, EQ_BAND_MIN, EQ_BAND_NULL};
pub use preset::{EqPreset, EqPresetFactory};
