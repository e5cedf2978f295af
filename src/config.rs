//! Configuration
//!
//! Stored as TOML in the platform configuration directory. A missing or
//! broken file is not fatal: defaults are used and a warning is logged.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::audio::wave::{gain_to_long, long_to_gain};
use crate::constants::{
    DEFAULT_CHANNELS, DEFAULT_CROSSFADE_MS, DEFAULT_MAIN_VOLUME, DEFAULT_OUTPUT_BUFFER_MS,
    DEFAULT_SAMPLE_RATE,
};
use crate::eq::EqParam;
use crate::error::ConfigError;

const CONFIG_FILE: &str = "jukebox-audio.toml";
const PRESET_FILE: &str = "eq-presets.toml";

/// Settings of one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Output device name; `None` selects the default device
    pub device: Option<String>,
    /// Per-stream buffer between decoder and device
    pub buffer_ms: u32,
    /// Null backend only: pace streams like a real device
    pub realtime: bool,
    /// Null backend only: format offered to sources
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_ms: DEFAULT_OUTPUT_BUFFER_MS,
            realtime: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl BackendConfig {
    /// Settings for a null backend measuring as fast as possible
    pub fn null() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Main volume, 0..=255
    pub main_volume: u8,
    /// Fade-in when a stream starts, 0 to start at full volume
    pub fade_in_ms: u64,
    /// Fade length used for manual crossfades
    pub crossfade_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            main_volume: DEFAULT_MAIN_VOLUME,
            fade_in_ms: 0,
            crossfade_ms: DEFAULT_CROSSFADE_MS,
        }
    }
}

/// Automatic volume; gains are stored as thousandths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoVolConfig {
    pub enabled: bool,
    pub desired_volume: i64,
    pub max_gain: i64,
    pub use_album_vol: bool,
}

impl Default for AutoVolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desired_volume: 1000,
            max_gain: 5000,
            use_album_vol: false,
        }
    }
}

impl AutoVolConfig {
    pub fn desired_gain(&self) -> f32 {
        long_to_gain(self.desired_volume) as f32
    }

    pub fn max_gain(&self) -> f32 {
        long_to_gain(self.max_gain) as f32
    }

    pub fn set_desired_gain(&mut self, gain: f32) {
        self.desired_volume = gain_to_long(f64::from(gain));
    }

    pub fn set_max_gain(&mut self, gain: f32) {
        self.max_gain = gain_to_long(f64::from(gain));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerConfig {
    pub enabled: bool,
    /// Band values in the `;`-separated preset format
    pub bands: String,
    /// Preset file; defaults to the configuration directory
    pub preset_file: Option<PathBuf>,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bands: EqParam::default().to_string(),
            preset_file: None,
        }
    }
}

impl EqualizerConfig {
    pub fn param(&self) -> EqParam {
        EqParam::from_string(&self.bands)
    }

    pub fn set_param(&mut self, param: &EqParam) {
        self.bands = param.to_string();
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output: BackendConfig,
    pub prelisten: BackendConfig,
    pub playback: PlaybackConfig,
    pub autovol: AutoVolConfig,
    pub equalizer: EqualizerConfig,
}

impl AppConfig {
    /// Load from the default location
    pub fn load() -> Self {
        match default_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                tracing::warn!("{}, using default configuration", e);
                Self::default()
            }
        }
    }

    /// Load from `path`; missing or invalid files give the defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("No configuration at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::try_load_from(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    fn try_load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&default_config_path()?)
    }

    /// Save to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Preset file to use, falling back to the configuration directory
    pub fn preset_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.equalizer.preset_file {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(PRESET_FILE)),
        }
    }
}

fn config_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("org", "jukebox", "jukebox-audio")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(ConfigError::NoConfigDir)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.output.device = Some("Speakers".to_string());
        config.playback.main_volume = 100;
        config.autovol.set_max_gain(2.5);
        let mut param = EqParam::new();
        param.bands[0] = 6.0;
        config.equalizer.set_param(&param);
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.autovol.max_gain(), 2.5);
        assert_eq!(loaded.equalizer.param(), param);
    }

    #[test]
    fn test_missing_and_invalid_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(AppConfig::load_from(&missing), AppConfig::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "playback = 12 [[").unwrap();
        assert_eq!(AppConfig::load_from(&broken), AppConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[playback]\nmain_volume = 17\n").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.playback.main_volume, 17);
        assert_eq!(loaded.playback.crossfade_ms, DEFAULT_CROSSFADE_MS);
        assert_eq!(loaded.autovol, AutoVolConfig::default());
    }
}
