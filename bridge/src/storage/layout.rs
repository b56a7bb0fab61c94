//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::BridgeError;
use crate::filesys::file::File;

/// Storage layout for the bridge
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Token record for one integration instance
    pub fn token_file(&self, instance_id: &str) -> File {
        File::new(self.tokens_dir().join(format!("{}.json", instance_id)))
    }

    /// Last discovered device list
    pub fn devices_cache_file(&self) -> File {
        File::new(self.base_dir.join("cache").join("devices.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the tokens directory
    pub fn tokens_dir(&self) -> PathBuf {
        self.base_dir.join("tokens")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), BridgeError> {
        tokio::fs::create_dir_all(self.base_dir.join("cache")).await?;
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        tokio::fs::create_dir_all(self.tokens_dir()).await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/stbridge");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stbridge");

        Self::new(base_dir)
    }
}
