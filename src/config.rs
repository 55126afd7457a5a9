use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::chunks::DEFAULT_CHUNK_PATTERN;
use crate::error::{LoadError, Result};

pub const ENV_DATA_DIR: &str = "ENHANCER_ATLAS_DATA_DIR";
pub const ENV_CHUNK_PATTERN: &str = "ENHANCER_ATLAS_CHUNK_PATTERN";
pub const ENV_METADATA: &str = "ENHANCER_ATLAS_METADATA";

pub const DEFAULT_METADATA_FILE: &str = "enhancer_metadata.feather";

// ---------------------------------------------------------------------------
// Dashboard configuration
// ---------------------------------------------------------------------------

/// Where the source files live.
///
/// Layered as: defaults < JSON config file < environment < command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    /// Directory holding the chunk files.
    pub data_dir: PathBuf,
    /// Regular expression matched against chunk file names.
    pub chunk_pattern: String,
    /// Metadata table; relative paths resolve against `data_dir`. `None`
    /// runs without metadata.
    pub metadata_file: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            chunk_pattern: DEFAULT_CHUNK_PATTERN.to_string(),
            metadata_file: Some(PathBuf::from(DEFAULT_METADATA_FILE)),
        }
    }
}

impl DashboardConfig {
    /// Read a JSON config file. A relative `data_dir` is taken relative to
    /// the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        let mut config: DashboardConfig =
            serde_json::from_str(&text).map_err(|e| LoadError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if config.data_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.data_dir = parent.join(&config.data_dir);
            }
        }
        Ok(config)
    }

    /// Apply `ENHANCER_ATLAS_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. An empty
    /// `ENHANCER_ATLAS_METADATA` disables metadata.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(pattern) = lookup(ENV_CHUNK_PATTERN) {
            self.chunk_pattern = pattern;
        }
        if let Some(meta) = lookup(ENV_METADATA) {
            self.metadata_file = (!meta.is_empty()).then(|| PathBuf::from(meta));
        }
        self
    }

    /// Resolved metadata path, if metadata is configured.
    pub fn metadata_path(&self) -> Option<PathBuf> {
        self.metadata_file.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.data_dir.join(p)
            }
        })
    }
}
