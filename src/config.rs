//! Validation configuration, persisted as TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::serializer::Encoding;

/// Settings shared by the client and the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Wire encoding for serialized documents.
    pub encoding: Encoding,
    /// Forward engine progress as `progress` messages.
    pub report_progress: bool,
    /// Minimum percentage change between forwarded progress messages.
    pub progress_step: u8,
    /// Name of the worker thread.
    pub worker_name: String,
    /// Send `done` after an engine failure, so waiters never hang.
    pub always_done_after_engine_error: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::Putdown,
            report_progress: true,
            progress_step: 10,
            worker_name: "lurch-validation".into(),
            always_done_after_engine_error: true,
        }
    }
}

impl ValidationConfig {
    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.progress_step == 0 || self.progress_step > 100 {
            return Err(ConfigError::Invalid {
                field: "progress_step",
                message: format!("must be between 1 and 100, got {}", self.progress_step),
            });
        }
        if self.worker_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "worker_name",
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ConfigWrite {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::ConfigWrite {
            path: path.display().to_string(),
            source: e,
        })
    }
}
