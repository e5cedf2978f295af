//! Named equalizer presets
//!
//! The collection is kept in memory and written back as a whole after every
//! change. On disk it is a TOML file with one `[[preset]]` table per entry,
//! the bands stored in the `;`-separated text format of [`EqParam`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::param::{EqParam, Typical10Band};
use crate::error::EqError;

/// A parameter set with a unique name
#[derive(Debug, Clone, PartialEq)]
pub struct EqPreset {
    pub name: String,
    pub param: EqParam,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetFile {
    #[serde(default, rename = "preset")]
    presets: Vec<PresetEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PresetEntry {
    name: String,
    bands: String,
}

/// Built-in presets as 10-band values, 31 Hz .. 16 kHz
const DEFAULT_PRESETS: &[(&str, [f32; 10])] = &[
    ("Flat", [0.0; 10]),
    ("Bass Booster", [5.5, 4.5, 3.5, 2.5, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    ("Bass Reducer", [-5.5, -4.5, -3.5, -2.5, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    ("Treble Booster", [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.5, 3.5, 4.5, 5.5]),
    ("Treble Reducer", [0.0, 0.0, 0.0, 0.0, 0.0, -1.0, -2.5, -3.5, -4.5, -5.5]),
    ("Classical", [4.5, 3.5, 3.0, 2.5, -1.5, -1.5, 0.0, 2.0, 3.0, 3.5]),
    ("Dance", [3.5, 6.5, 5.0, 0.0, 2.0, 3.5, 5.0, 4.5, 3.5, 0.0]),
    ("Loudness", [6.0, 4.0, 0.0, 0.0, -2.0, 0.0, -1.0, -5.0, 5.0, 1.0]),
    ("Pop", [-1.5, -1.0, 0.0, 2.0, 4.0, 4.0, 2.0, 0.0, -1.0, -1.5]),
    ("Rock", [5.0, 4.0, 3.0, 1.5, -0.5, -1.0, 0.5, 2.5, 3.5, 4.5]),
    ("Spoken Word", [-3.5, -0.5, 0.0, 0.5, 3.5, 4.5, 4.5, 4.0, 2.0, 0.0]),
];

/// Preset collection with optional file persistence
#[derive(Debug)]
pub struct EqPresetFactory {
    path: Option<PathBuf>,
    presets: BTreeMap<String, EqParam>,
}

impl EqPresetFactory {
    /// A factory that never touches the disk, holding the default presets
    pub fn in_memory() -> Self {
        let mut factory = Self {
            path: None,
            presets: BTreeMap::new(),
        };
        factory.hash_default_presets();
        factory
    }

    /// Load presets from `path`.
    ///
    /// A missing file yields the default presets; nothing is written until
    /// the collection changes.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, EqError> {
        let path = path.into();
        let mut factory = Self {
            path: Some(path.clone()),
            presets: BTreeMap::new(),
        };

        if !path.exists() {
            tracing::info!("No preset file at {}, using defaults", path.display());
            factory.hash_default_presets();
            return Ok(factory);
        }

        let content = std::fs::read_to_string(&path)?;
        let file: PresetFile =
            toml::from_str(&content).map_err(|e| EqError::Persist(e.to_string()))?;
        for entry in file.presets {
            if !entry.name.trim().is_empty() {
                factory
                    .presets
                    .insert(entry.name, EqParam::from_string(&entry.bands));
            }
        }

        tracing::debug!("Loaded {} equalizer presets", factory.presets.len());
        Ok(factory)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Preset names, sorted
    pub fn names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn get_preset_by_name(&self, name: &str) -> Result<EqPreset, EqError> {
        self.presets
            .get(name)
            .map(|param| EqPreset {
                name: name.to_string(),
                param: *param,
            })
            .ok_or_else(|| EqError::PresetNotFound(name.to_string()))
    }

    /// First preset (by name) whose bands equal `param`
    pub fn get_preset_by_param(&self, param: &EqParam) -> Option<EqPreset> {
        self.presets
            .iter()
            .find(|(_, p)| *p == param)
            .map(|(name, p)| EqPreset {
                name: name.clone(),
                param: *p,
            })
    }

    /// Add or replace a preset and save the collection
    pub fn add_preset(&mut self, name: &str, param: EqParam) -> Result<(), EqError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EqError::InvalidPresetName);
        }
        self.presets.insert(name.to_string(), param);
        self.save_all_presets()
    }

    /// Remove a preset and save the collection
    pub fn delete_preset(&mut self, name: &str) -> Result<(), EqError> {
        if self.presets.remove(name).is_none() {
            return Err(EqError::PresetNotFound(name.to_string()));
        }
        self.save_all_presets()
    }

    /// Restore the built-in presets, replacing same-named ones, and save
    pub fn add_default_presets(&mut self) -> Result<(), EqError> {
        self.hash_default_presets();
        self.save_all_presets()
    }

    fn hash_default_presets(&mut self) {
        for (name, bands) in DEFAULT_PRESETS {
            self.presets.insert(
                (*name).to_string(),
                EqParam::from_typical_10_band(bands, Typical10Band::Sj2),
            );
        }
    }

    fn save_all_presets(&self) -> Result<(), EqError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = PresetFile {
            presets: self
                .presets
                .iter()
                .map(|(name, param)| PresetEntry {
                    name: name.clone(),
                    bands: param.to_string(),
                })
                .collect(),
        };
        let content = toml::to_string_pretty(&file).map_err(|e| EqError::Persist(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        tracing::debug!("Saved {} equalizer presets to {}", self.presets.len(), path.display());
        Ok(())
    }
}
