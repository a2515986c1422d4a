//! Configuration Storage
//!
//! Handles reading/writing the configuration file to disk.
//! Config location: ~/.oxidefs on macOS/Linux, %APPDATA%\OxideFs on Windows

use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{FsConfig, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the configuration directory
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("OxideFs"));
        }
        dirs::home_dir()
            .map(|home| home.join(".oxidefs"))
            .ok_or(ConfigError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".oxidefs"))
            .ok_or(ConfigError::NoConfigDir)
    }
}

/// Get the config file path
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

/// Configuration storage manager
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Create a new storage manager with default path
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self { path: config_file()? })
    }

    /// Create storage manager with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    async fn ensure_dir(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Load configuration from disk.
    ///
    /// A missing file yields the defaults. A corrupted file is backed up and the
    /// defaults are returned.
    pub async fn load(&self) -> Result<FsConfig, ConfigError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FsConfig::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        match serde_json::from_str::<FsConfig>(&contents) {
            Ok(config) if config.version > CONFIG_VERSION => Err(ConfigError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            }),
            Ok(config) => Ok(config),
            Err(e) => {
                // 配置文件损坏：备份后使用默认配置
                tracing::warn!("Config file corrupted: {}", e);
                match self.backup().await {
                    Ok(backup_path) => {
                        tracing::warn!("Corrupted config backed up to {:?}, using defaults", backup_path)
                    }
                    Err(backup_err) => {
                        tracing::error!("Failed to backup corrupted config: {}", backup_err)
                    }
                }
                Ok(FsConfig::default())
            }
        }
    }

    /// Save configuration to disk (temp file, then rename)
    pub async fn save(&self, config: &FsConfig) -> Result<(), ConfigError> {
        self.ensure_dir().await?;

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Copy the current file next to itself with a timestamp suffix
    pub async fn backup(&self) -> Result<PathBuf, ConfigError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}
