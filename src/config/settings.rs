use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::Compression;
use crate::error::{Result, SnapshotError};

pub const SETTINGS_FILE: &str = "config.json";

/// Tool-wide settings read from `<home>/config.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Root of the per-service snapshot directories. Empty means `<home>/snapshots`.
    pub snapshot_root: PathBuf,
    pub default_compression: Compression,
    pub docker_binary: String,
    pub zstd_level: i32,
    pub gzip_level: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            snapshot_root: PathBuf::new(),
            default_compression: Compression::Zstd,
            docker_binary: "docker".to_string(),
            zstd_level: 3,
            gzip_level: 6,
        }
    }
}

impl Settings {
    /// Load settings from the home directory, applying `DBSNAP_SNAPSHOT_ROOT`.
    pub fn load() -> Result<Self> {
        let home = home_dir()?;
        let mut settings = Self::load_from(&home)?;
        if let Ok(root) = std::env::var("DBSNAP_SNAPSHOT_ROOT") {
            if !root.is_empty() {
                settings.snapshot_root = PathBuf::from(root);
            }
        }
        Ok(settings)
    }

    /// Load `config.json` under `home`; a missing file yields defaults.
    pub fn load_from(home: &Path) -> Result<Self> {
        let path = home.join(SETTINGS_FILE);
        let mut settings = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Self::default()
            } else {
                serde_json::from_str::<Settings>(&content).map_err(|e| {
                    SnapshotError::Config(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            Self::default()
        };
        if settings.snapshot_root.as_os_str().is_empty() {
            settings.snapshot_root = home.join("snapshots");
        }
        Ok(settings)
    }
}

/// Directory holding `config.json` and `services.json`.
pub fn home_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DBSNAP_HOME") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    if cfg!(windows) {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Ok(PathBuf::from(appdata).join("dbsnap"));
        }
        if let Ok(home) = std::env::var("USERPROFILE") {
            return Ok(PathBuf::from(home).join("AppData\\Roaming").join("dbsnap"));
        }
        Err(SnapshotError::Config(
            "APPDATA not set; cannot determine config directory".into(),
        ))
    } else {
        if let Ok(home) = std::env::var("HOME") {
            return Ok(PathBuf::from(home).join(".dbsnap"));
        }
        Err(SnapshotError::Config(
            "HOME not set; cannot determine config directory".into(),
        ))
    }
}
