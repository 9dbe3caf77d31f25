//! Editor configuration: grid geometry and the tier count of new trees.

use crate::loader::{DataLoadError, deserialize_file, find_data_file};
use abilitree_core::geometry::{ConfigurationError, GridConfig, validate_tier_count};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Base name of the configuration file inside a data directory.
pub const EDITOR_CONFIG_FILE: &str = "editor";

/// Validated editor settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditorConfig {
    pub grid: GridConfig,
    /// Tier count used when the editor creates a tree without one.
    pub default_tier_count: u32,
}

impl EditorConfig {
    pub fn new(grid: GridConfig, default_tier_count: i64) -> Result<Self, ConfigurationError> {
        Ok(Self {
            grid,
            default_tier_count: validate_tier_count(default_tier_count)?,
        })
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            default_tier_count: DEFAULT_TIER_COUNT,
        }
    }
}

const DEFAULT_TIER_COUNT: u32 = 3;

/// Raw file contents. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct EditorConfigData {
    tier_height: f64,
    column_width: f64,
    origin_x: f64,
    default_tier_count: i64,
}

impl Default for EditorConfigData {
    fn default() -> Self {
        let grid = GridConfig::default();
        Self {
            tier_height: grid.tier_height(),
            column_width: grid.column_width(),
            origin_x: grid.origin_x(),
            default_tier_count: i64::from(DEFAULT_TIER_COUNT),
        }
    }
}

impl TryFrom<EditorConfigData> for EditorConfig {
    type Error = ConfigurationError;

    fn try_from(data: EditorConfigData) -> Result<Self, Self::Error> {
        let grid = GridConfig::new(data.tier_height, data.column_width, data.origin_x)?;
        EditorConfig::new(grid, data.default_tier_count)
    }
}

/// Load `editor.{ron,toml,json}` from `dir`.
///
/// A missing file yields the defaults. Values that parse but fail
/// validation are reported as [`DataLoadError::Parse`].
pub fn load_editor_config(dir: &Path) -> Result<EditorConfig, DataLoadError> {
    let Some(path) = find_data_file(dir, EDITOR_CONFIG_FILE)? else {
        debug!(dir = %dir.display(), "no editor config, using defaults");
        return Ok(EditorConfig::default());
    };
    let data: EditorConfigData = deserialize_file(&path)?;
    EditorConfig::try_from(data).map_err(|e| DataLoadError::Parse {
        file: path,
        detail: e.to_string(),
    })
}
