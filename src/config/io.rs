use std::env::{self, current_exe};
use std::path::PathBuf;
use std::str;
use directories_next::ProjectDirs;
use log::{info, warn};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config::types::SessionConfig;
use crate::error::ConfigError;

/**
 * Environment variable that points at an explicit config file.
 */
pub const CONFIG_PATH_ENV: &str = "HAND_CONTROLLER_CONFIG";

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to hand-controller.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "maorobotica", "hand-controller").map(|dirs| {
        dirs.config_dir().join("hand-controller.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = get_portable_config_path() {
        if path.is_file() {
            return Ok(path);
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

/// Read-only access to the session config file. Nothing about the session
/// itself is ever written back.
#[derive(Debug, Clone)]
pub struct ConfigIO {
    path: PathBuf,
}

impl ConfigIO {
    pub fn new() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        info!("Using config file {}", path.to_string_lossy());
        Ok(ConfigIO { path })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        ConfigIO { path: path.into() }
    }

    async fn read_file(&self) -> Result<SessionConfig, ConfigError> {
        let mut file = File::open(&self.path).await?;

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        let content = str::from_utf8(&content)?;
        if content.trim().is_empty() {
            return Ok(SessionConfig::default());
        }

        let config: SessionConfig = serde_json::from_str(content)?;
        Ok(config)
    }

    /// A missing file yields the defaults; a present but broken file is an error.
    pub async fn read(&self) -> Result<SessionConfig, ConfigError> {
        let config = match self.read_file().await {
            Ok(config) => config,
            Err(err) if err.is_file_not_found_error() => {
                info!("Config file not found, using defaults");
                SessionConfig::default()
            },
            Err(err) => return Err(err),
        };

        config.validate()?;
        Ok(config)
    }
}
