use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// `strftime` layout of snapshot directory names (UTC).
pub const DIR_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

pub fn service_dir(root: &Path, service: &str) -> PathBuf {
    root.join(sanitize(service))
}

/// `<timestamp>` or `<timestamp>-<sanitized tag>`.
pub fn snapshot_dir_name(at: DateTime<Utc>, tag: Option<&str>) -> String {
    let ts = at.format(DIR_TIMESTAMP_FORMAT);
    match tag.map(sanitize).filter(|t| !t.is_empty()) {
        Some(tag) => format!("{}-{}", ts, tag),
        None => ts.to_string(),
    }
}

/// Create a fresh snapshot directory for `service` under `root`.
///
/// Two calls in the same second with the same tag collide; the second fails
/// with `AlreadyExists` rather than sharing the directory.
pub fn allocate_snapshot_dir(root: &Path, service: &str, tag: Option<&str>) -> Result<PathBuf> {
    let parent = service_dir(root, service);
    fs::create_dir_all(&parent)?;
    let dir = parent.join(snapshot_dir_name(Utc::now(), tag));
    fs::create_dir(&dir)?;
    Ok(dir)
}

/// Tag suffix encoded in a snapshot directory name, if any.
pub fn tag_from_dir_name(name: &str) -> Option<String> {
    let (ts, tag) = name.split_once('-')?;
    if tag.is_empty() || !ts.ends_with('Z') {
        return None;
    }
    Some(tag.to_string())
}

/// Subdirectories of `dir`, sorted by name. A missing `dir` yields none.
pub fn child_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

pub fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
