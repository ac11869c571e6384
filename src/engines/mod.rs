use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::codec::{ArtifactDigest, Codec, CodecWriter, Compression};
use crate::config::{ServiceInfo, SnapshotFile, SnapshotManifest};
use crate::error::{Result, SnapshotError};
use crate::exec::{ContainerExec, ExecOutput};
use crate::utils::hash::verify_file;
use crate::utils::io::remove_file_best_effort;
use crate::utils::poll::CancelToken;

pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod selector;

pub use mongo::MongoEngine;
pub use mysql::MySqlEngine;
pub use postgres::PostgresEngine;
pub use redis::{RedisEngine, RedisTiming};
pub use selector::{DatabaseEngine, EngineRegistry};

/// Collaborators handed to every engine call.
pub struct EngineContext<'a> {
    pub exec: &'a dyn ContainerExec,
    pub cancel: &'a CancelToken,
    pub zstd_level: i32,
    pub gzip_level: u32,
}

impl<'a> EngineContext<'a> {
    pub fn new(exec: &'a dyn ContainerExec, cancel: &'a CancelToken) -> Self {
        Self {
            exec,
            cancel,
            zstd_level: 3,
            gzip_level: 6,
        }
    }

    pub fn codec(&self, compression: Compression) -> Codec {
        Codec::new(compression).with_levels(self.zstd_level, self.gzip_level)
    }
}

/// Capture and recovery protocol for one database kind.
pub trait Engine {
    /// Canonical engine identifier recorded in manifests.
    fn engine_type(&self) -> &'static str;

    /// Names (lowercase) this engine answers to.
    fn aliases(&self) -> &'static [&'static str];

    fn can_handle(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        self.aliases().iter().any(|a| *a == name)
    }

    /// File name of the primary artifact for `compression`.
    fn artifact_name(&self, compression: Compression) -> String;

    /// Export `service` into exactly one artifact under `output_dir` and
    /// return a manifest listing it as `files[0]`. The caller persists it.
    fn create(
        &self,
        ctx: &EngineContext<'_>,
        service: &ServiceInfo,
        output_dir: &Path,
        compression: Compression,
        note: &str,
        tag: Option<&str>,
    ) -> Result<SnapshotManifest>;

    /// Load the snapshot in `snapshot_dir` back into `service`.
    fn restore(
        &self,
        ctx: &EngineContext<'_>,
        service: &ServiceInfo,
        snapshot_dir: &Path,
        manifest: &SnapshotManifest,
        force: bool,
    ) -> Result<()>;
}

/// `<prefix><extension><compression suffix>`, e.g. `pg.dump.zst`.
pub fn artifact_file_name(prefix: &str, extension: &str, compression: Compression) -> String {
    format!("{}{}{}", prefix, extension, compression.suffix())
}

/// Write `<output_dir>/<name>` through `codec`, staging it as `<name>.tmp`
/// and renaming only once `fill` and the codec close both succeed. The
/// staging file is removed on any failure.
pub fn write_artifact<F>(output_dir: &Path, name: &str, codec: Codec, fill: F) -> Result<SnapshotFile>
where
    F: FnOnce(&mut CodecWriter) -> Result<()>,
{
    let final_path = output_dir.join(name);
    let temp_path = output_dir.join(format!("{}.tmp", name));

    let result: Result<ArtifactDigest> = (|| {
        let mut writer = codec.create(&temp_path)?;
        fill(&mut writer)?;
        let digest = writer.close()?;
        fs::rename(&temp_path, &final_path)?;
        Ok(digest)
    })();

    match result {
        Ok(digest) => {
            debug!(file = name, size = digest.size, sha256 = %digest.sha256, "artifact written");
            Ok(SnapshotFile {
                name: name.to_string(),
                sha256: digest.sha256,
                size: digest.size,
            })
        }
        Err(e) => {
            remove_file_best_effort(&temp_path);
            Err(e)
        }
    }
}

pub fn ensure_running(ctx: &EngineContext<'_>, service: &ServiceInfo) -> Result<()> {
    if !ctx.exec.is_running(&service.container)? {
        return Err(SnapshotError::ContainerNotRunning(service.container.clone()));
    }
    Ok(())
}

/// Re-hash the manifest's primary file and return its path.
pub fn verified_main_file(snapshot_dir: &Path, manifest: &SnapshotManifest) -> Result<PathBuf> {
    let main = manifest.main_file()?;
    verify_file(snapshot_dir, main)?;
    Ok(snapshot_dir.join(&main.name))
}

/// Fail a dump command that exited non-zero.
pub fn check_dump(context: &str, out: &ExecOutput) -> Result<()> {
    if !out.success() {
        return Err(SnapshotError::command(context, out.exit_code, out.combined()));
    }
    Ok(())
}

/// Lines of `text` containing any of `markers`.
pub fn marker_lines<'t>(text: &'t str, markers: &[&str], ignore_case: bool) -> Vec<&'t str> {
    text.lines()
        .filter(|line| {
            if ignore_case {
                let lower = line.to_ascii_lowercase();
                markers.iter().any(|m| lower.contains(&m.to_ascii_lowercase()))
            } else {
                markers.iter().any(|m| line.contains(m))
            }
        })
        .collect()
}

/// Apply the restore error policy: error lines or a non-zero exit fail the
/// restore unless `force` is set, in which case they are only logged.
pub fn check_restore(context: &str, out: &ExecOutput, error_lines: &[&str], force: bool) -> Result<()> {
    if error_lines.is_empty() && out.success() {
        return Ok(());
    }
    let detail = if error_lines.is_empty() {
        out.combined()
    } else {
        error_lines.join("\n")
    };
    if force {
        warn!(
            context,
            exit_code = out.exit_code,
            errors = error_lines.len(),
            "restore reported errors; continuing because force is set"
        );
        return Ok(());
    }
    Err(SnapshotError::command(context, out.exit_code, detail))
}
