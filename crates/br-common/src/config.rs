use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bringup/config.json";

/// Settings taken from the process environment before the JSON file is read.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Location of the JSON configuration file (`BRINGUP_CONFIG`)
    pub config_path: PathBuf,
    /// Overrides the interface named in the file (`BRINGUP_INTERFACE`)
    pub interface: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            interface: None,
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("BRINGUP_CONFIG") {
            config.config_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BRINGUP_INTERFACE") {
            if !v.is_empty() {
                config.interface = Some(v);
            }
        }

        config
    }
}

/// Read a JSON config file. A missing file yields the type's defaults.
pub fn load_json_or_default<T>(path: &Path) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        info!("No config at {}, using defaults", path.display());
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
}
