//! # Streaming Configuration
//!
//! Budgets and tuning knobs, loaded once at startup from a TOML file.
//!
//! ```toml
//! max_concurrent_operations = 8
//! cache_timeout_seconds = 30.0
//! reserve_bytes = 67108864
//!
//! [budgets]
//! geometry_bytes = 134217728
//! texture_bytes  = 268435456
//! audio_bytes    = 67108864
//! animation_bytes = 33554432
//! script_bytes   = 16777216
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::budget::MemoryBudgets;
use crate::error::{StreamingError, StreamingResult};
use crate::resource::ResourceCategory;

/// Per-category ceilings in bytes.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Meshes and collision geometry.
    pub geometry_bytes: usize,
    /// Texture data.
    pub texture_bytes: usize,
    /// Audio banks.
    pub audio_bytes: usize,
    /// Animation clips.
    pub animation_bytes: usize,
    /// Scripts and data tables.
    pub script_bytes: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        const MB: usize = 1024 * 1024;
        Self {
            geometry_bytes: 128 * MB,
            texture_bytes: 256 * MB,
            audio_bytes: 64 * MB,
            animation_bytes: 32 * MB,
            script_bytes: 16 * MB,
        }
    }
}

impl BudgetConfig {
    /// The runtime budget table for this config.
    #[must_use]
    pub fn budgets(&self) -> MemoryBudgets {
        let mut capacities = [0usize; ResourceCategory::COUNT];
        capacities[ResourceCategory::Geometry.index()] = self.geometry_bytes;
        capacities[ResourceCategory::Texture.index()] = self.texture_bytes;
        capacities[ResourceCategory::Audio.index()] = self.audio_bytes;
        capacities[ResourceCategory::Animation.index()] = self.animation_bytes;
        capacities[ResourceCategory::Script.index()] = self.script_bytes;
        MemoryBudgets::with_capacities(capacities)
    }
}

/// Manager configuration.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Operations drained per `update` tick.
    pub max_concurrent_operations: usize,
    /// Idle seconds before an auto-unload resource expires.
    pub cache_timeout_seconds: f64,
    /// Address space pre-reserved by the owned page allocator
    /// (0 disables the reserve).
    pub reserve_bytes: usize,
    /// Per-category ceilings.
    pub budgets: BudgetConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 8,
            cache_timeout_seconds: 30.0,
            reserve_bytes: 0,
            budgets: BudgetConfig::default(),
        }
    }
}

impl StreamingConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// [`StreamingError::ConfigParse`] for malformed TOML.
    pub fn from_toml_str(text: &str) -> StreamingResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a config file.
    ///
    /// # Errors
    ///
    /// [`StreamingError::ConfigRead`] or [`StreamingError::ConfigParse`].
    pub fn load(path: &Path) -> StreamingResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| StreamingError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
