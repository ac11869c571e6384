use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::codec::Compression;
use crate::error::{Result, SnapshotError};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ENCRYPTION_NONE: &str = "none";

/// Durable record describing one snapshot directory.
///
/// `files[0]` is always the primary data artifact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotManifest {
    pub service: String,
    pub engine: String,
    #[serde(default)]
    pub image: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub tool_version: String,
    pub compression: Compression,
    #[serde(default = "default_encryption")]
    pub encryption: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub files: Vec<SnapshotFile>,
}

/// One file inside a snapshot. `sha256` covers the bytes as stored on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub name: String,
    pub sha256: String,
    pub size: u64,
}

impl SnapshotFile {
    /// Names must be a single plain component so they resolve inside the
    /// snapshot directory.
    pub fn check_name(&self) -> Result<()> {
        let mut components = Path::new(&self.name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(SnapshotError::InvalidManifest(format!(
                "file name '{}' does not name a file inside the snapshot",
                self.name
            ))),
        }
    }
}

fn default_encryption() -> String {
    ENCRYPTION_NONE.to_string()
}

impl SnapshotManifest {
    pub fn new(
        service: &str,
        engine: &str,
        image: &str,
        compression: Compression,
        note: &str,
        tag: Option<&str>,
    ) -> Self {
        Self {
            service: service.to_string(),
            engine: engine.to_string(),
            image: image.to_string(),
            created_at: Utc::now(),
            updated_at: None,
            tag: tag.filter(|t| !t.is_empty()).map(str::to_string),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            compression,
            encryption: default_encryption(),
            note: note.to_string(),
            files: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(SnapshotError::InvalidManifest("service is empty".into()));
        }
        if self.engine.trim().is_empty() {
            return Err(SnapshotError::InvalidManifest("engine is empty".into()));
        }
        if self.files.is_empty() {
            return Err(SnapshotError::InvalidManifest("manifest lists no files".into()));
        }
        for file in &self.files {
            file.check_name()?;
        }
        Ok(())
    }

    /// The primary data file, `files[0]`.
    pub fn main_file(&self) -> Result<&SnapshotFile> {
        let main = self
            .files
            .first()
            .ok_or_else(|| SnapshotError::InvalidManifest("manifest lists no files".into()))?;
        main.check_name()?;
        Ok(main)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Read `manifest.json` from a snapshot directory.
    pub fn load(snapshot_dir: &Path) -> Result<Self> {
        let content = fs::read_to_string(snapshot_dir.join(MANIFEST_FILE))?;
        Self::from_json(&content)
    }

    /// Write `manifest.json` into a snapshot directory via a temp file and rename.
    pub fn save(&self, snapshot_dir: &Path) -> Result<()> {
        let path = snapshot_dir.join(MANIFEST_FILE);
        let tmp = snapshot_dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, self.to_json()?)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Read-only projection of a snapshot used by list, search and prune.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub service: String,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub path: PathBuf,
    pub engine: String,
    pub image: String,
    pub note: String,
}

impl SnapshotInfo {
    /// Build the projection from a manifest, falling back to the tag encoded in
    /// the directory name when the manifest carries none.
    pub fn from_manifest(manifest: &SnapshotManifest, dir: &Path) -> Self {
        let tag = manifest.tag.clone().or_else(|| {
            dir.file_name()
                .and_then(|n| n.to_str())
                .and_then(crate::storage::tag_from_dir_name)
        });
        Self {
            service: manifest.service.clone(),
            tag,
            created_at: manifest.created_at,
            size: manifest.total_size(),
            path: dir.to_path_buf(),
            engine: manifest.engine.clone(),
            image: manifest.image.clone(),
            note: manifest.note.clone(),
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = SnapshotManifest::load(dir)?;
        Ok(Self::from_manifest(&manifest, dir))
    }

    pub fn matches_tag(&self, tag: &str) -> bool {
        match self.tag.as_deref() {
            Some(t) => t == tag || t == crate::storage::sanitize(tag),
            None => false,
        }
    }
}
