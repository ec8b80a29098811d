// src/config.rs
//
// Engine configuration.
//
// Fixed for the lifetime of an engine instance: the render graph is
// compiled against the sample rate and block size chosen here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Render sample rate (Hz).
    pub sample_rate: u32,

    /// Largest block the render pass is asked to produce at once.
    pub max_block_size: usize,

    /// Capacity of the record/export capture ring, in seconds of stereo audio.
    pub capture_seconds: f64,

    /// Number of render graph updates that may be in flight.
    pub update_queue_depth: usize,

    /// Where finished recordings are written.
    pub recordings_dir: PathBuf,

    /// Volume given to newly created channels (0.0 - 1.0).
    pub default_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            max_block_size: 512,
            capture_seconds: 20.0,
            update_queue_depth: 16,
            recordings_dir: PathBuf::from("recordings"),
            default_volume: 0.8,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::Config("sample_rate must be positive".into()));
        }
        if self.max_block_size == 0 {
            return Err(EngineError::Config("max_block_size must be positive".into()));
        }
        if self.update_queue_depth == 0 {
            return Err(EngineError::Config(
                "update_queue_depth must be positive".into(),
            ));
        }
        if !(self.capture_seconds > 0.0) {
            return Err(EngineError::Config("capture_seconds must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(EngineError::Config(
                "default_volume must lie in 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }

    /// Capture ring capacity in interleaved stereo samples.
    pub fn capture_capacity(&self) -> usize {
        (self.capture_seconds * self.sample_rate as f64) as usize * 2
    }
}
