// ABOUTME: Engine configuration: dice limits, recursion bounds and explosion policy.
// ABOUTME: Deserializable from JSON so the CLI (or a bot) can load it from disk.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunable limits and policies for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest dice count accepted in a single dice part.
    pub max_dice_count: u32,
    /// Largest die size accepted.
    pub max_dice_sides: u32,
    /// Upper bound on stat-block rescans in one resolution call.
    pub max_stat_passes: usize,
    /// Upper bound on nested macro references.
    pub max_macro_depth: usize,
    /// Whether dice added by an explosion can be dropped by a later drop/keep stage.
    pub explosions_droppable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dice_count: 1000,
            max_dice_sides: 10000,
            max_stat_passes: 256,
            max_macro_depth: 16,
            explosions_droppable: true,
        }
    }
}

impl EngineConfig {
    /// Parses a config from JSON text. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

/// Reads and deserializes a JSON file, used for configs, stat sheets and macro tiers.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}
