use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ServiceInfo;
use crate::config::settings::home_dir;
use crate::error::{Result, SnapshotError};

pub const REGISTRY_FILE: &str = "services.json";

/// Resolves a logical service name to its connection facts.
pub trait ServiceResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<ServiceInfo>;

    fn services(&self) -> Result<Vec<ServiceInfo>>;
}

/// Services persisted in `<home>/services.json`.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    path: PathBuf,
}

impl ServiceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry in the default home directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(home_dir()?.join(REGISTRY_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<ServiceInfo>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Vec<ServiceInfo>>(&content)
            .map_err(|e| SnapshotError::Config(format!("{}: {}", self.path.display(), e)))
    }

    pub fn save(&self, services: &[ServiceInfo]) -> Result<()> {
        let json = serde_json::to_string_pretty(services)?;
        let dir = self
            .path
            .parent()
            .ok_or_else(|| SnapshotError::Config("invalid registry path".into()))?;
        fs::create_dir_all(dir)?;
        // Write atomically: write to temp file then rename
        let tmp = dir.join(format!("{}.tmp", REGISTRY_FILE));
        fs::write(&tmp, json)?;
        if cfg!(windows) && self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Add a service; names must be unique.
    pub fn register(&self, service: ServiceInfo) -> Result<()> {
        let mut services = self.load()?;
        if services.iter().any(|s| s.name == service.name) {
            return Err(SnapshotError::InvalidArgument(format!(
                "service '{}' already exists",
                service.name
            )));
        }
        services.push(service);
        self.save(&services)
    }
}

impl ServiceResolver for ServiceRegistry {
    fn resolve(&self, name: &str) -> Result<ServiceInfo> {
        self.load()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SnapshotError::UnknownService(name.to_string()))
    }

    fn services(&self) -> Result<Vec<ServiceInfo>> {
        self.load()
    }
}
