//! Application configuration management.
//!
//! Handles loading, saving, and defaulting of engine-wide settings: the
//! storage root, catalog endpoint, worker pool sizing, and synchronization
//! bindings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sync::PlaylistBind;

/// Default page size requested from the catalog API.
const DEFAULT_PAGE_SIZE: u32 = 50;

/// Default seconds between synchronization cycles (15 minutes).
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 15 * 60;

/// Remote catalog connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Base URL of the catalog API.
    #[serde(default)]
    pub base_url: String,
    /// Page size for paginated endpoints.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PoolConfig {
    /// Worker count override; `None` uses the host's logical core count.
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Seconds between reconciliation cycles.
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
    /// Playlist bindings to reconcile each cycle.
    #[serde(default)]
    pub bindings: Vec<PlaylistBind>,
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            bindings: Vec::new(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Root directory for downloaded media and thumbnails.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Remote catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            catalog: CatalogConfig::default(),
            pool: PoolConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .map_or_else(|| PathBuf::from("tunesync-data"), |dir| dir.join("tunesync"))
}

impl AppConfig {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("tunesync.json"),
            |dir| dir.join("tunesync").join("config.json"),
        )
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(
                "no configuration at {}, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Save configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::FileSystem {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }

        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!("saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate settings that have no sensible fallback.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.catalog.base_url.trim().is_empty() {
            return Err(Error::Configuration(
                "catalog.base_url must be set".to_string(),
            ));
        }
        if self.catalog.page_size == 0 {
            return Err(Error::Configuration(
                "catalog.page_size must be at least 1".to_string(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(Error::Configuration(
                "sync.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.pool.workers == Some(0) {
            return Err(Error::Configuration(
                "pool.workers must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}
