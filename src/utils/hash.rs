use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Result as IoResult};
use std::path::Path;

use crate::config::SnapshotFile;
use crate::error::{Result, SnapshotError};

pub fn sha256_file(path: &Path) -> IoResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary bytes → hex
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Re-hash a snapshot file on disk and compare against its manifest entry.
pub fn verify_file(snapshot_dir: &Path, file: &SnapshotFile) -> Result<()> {
    let path = snapshot_dir.join(&file.name);
    let actual = sha256_file(&path)?;
    if !actual.eq_ignore_ascii_case(&file.sha256) {
        return Err(SnapshotError::ChecksumMismatch {
            path,
            expected: file.sha256.clone(),
            actual,
        });
    }
    Ok(())
}
