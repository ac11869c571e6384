//! Snapshot orchestration: resolves services, picks engines, and owns the
//! lifecycle of snapshot directories.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::codec::{Compression, open_reader};
use crate::config::{ServiceInfo, Settings, SnapshotInfo, SnapshotManifest};
use crate::engines::{Engine, EngineContext, EngineRegistry, verified_main_file, write_artifact};
use crate::error::{Result, SnapshotError};
use crate::exec::ContainerExec;
use crate::registry::ServiceResolver;
use crate::storage;
use crate::utils::hash::sha256_file;
use crate::utils::io::{dir_size, remove_dir_best_effort, remove_file_best_effort};
use crate::utils::poll::CancelToken;

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub tag: Option<String>,
    pub note: String,
    /// Compression mode name; unset or unrecognised falls back to the default.
    pub compression: Option<String>,
}

/// Which snapshot a restore (or verify/repack) acts on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SnapshotSelector {
    #[default]
    Latest,
    Tag(String),
    /// Newest snapshot created strictly before the cutoff.
    Before(DateTime<Utc>),
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub selector: SnapshotSelector,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct PruneReport {
    pub service: String,
    pub kept: usize,
    pub removed: Vec<SnapshotInfo>,
    pub reclaimed_bytes: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Ok,
    Missing,
    Mismatch { actual: String },
}

#[derive(Debug, Clone)]
pub struct FileCheck {
    pub name: String,
    pub status: FileStatus,
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub snapshot: SnapshotInfo,
    pub files: Vec<FileCheck>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.files.iter().all(|f| f.status == FileStatus::Ok)
    }
}

pub struct SnapshotService {
    root: PathBuf,
    resolver: Arc<dyn ServiceResolver>,
    exec: Arc<dyn ContainerExec>,
    engines: EngineRegistry,
    default_compression: Compression,
    zstd_level: i32,
    gzip_level: u32,
    cancel: CancelToken,
}

impl SnapshotService {
    pub fn new(
        root: impl Into<PathBuf>,
        resolver: Arc<dyn ServiceResolver>,
        exec: Arc<dyn ContainerExec>,
    ) -> Self {
        Self {
            root: root.into(),
            resolver,
            exec,
            engines: EngineRegistry::default(),
            default_compression: Compression::Zstd,
            zstd_level: 3,
            gzip_level: 6,
            cancel: CancelToken::new(),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        resolver: Arc<dyn ServiceResolver>,
        exec: Arc<dyn ContainerExec>,
    ) -> Self {
        let mut svc = Self::new(settings.snapshot_root.clone(), resolver, exec);
        svc.default_compression = settings.default_compression;
        svc.zstd_level = settings.zstd_level;
        svc.gzip_level = settings.gzip_level;
        svc
    }

    pub fn with_engines(mut self, engines: EngineRegistry) -> Self {
        self.engines = engines;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Token that interrupts in-progress waits when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn context(&self) -> EngineContext<'_> {
        let mut ctx = EngineContext::new(self.exec.as_ref(), &self.cancel);
        ctx.zstd_level = self.zstd_level;
        ctx.gzip_level = self.gzip_level;
        ctx
    }

    fn compression_or_default(&self, requested: Option<&str>) -> Compression {
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            None => self.default_compression,
            Some(name) => name.parse().unwrap_or_else(|err| {
                warn!(%err, fallback = %self.default_compression, "unknown compression; using default");
                self.default_compression
            }),
        }
    }

    pub fn services(&self) -> Result<Vec<ServiceInfo>> {
        self.resolver.services()
    }

    /// Capture a new snapshot of `service`.
    pub fn create(&self, service: &str, opts: &CreateOptions) -> Result<SnapshotManifest> {
        let info = self.resolver.resolve(service)?;
        let engine = self.engines.lookup(&info.engine)?;
        let compression = self.compression_or_default(opts.compression.as_deref());

        if !self.exec.is_running(&info.container)? {
            return Err(SnapshotError::ContainerNotRunning(info.container.clone()));
        }

        let tag = opts.tag.as_deref().filter(|t| !t.trim().is_empty());
        let dir = storage::allocate_snapshot_dir(&self.root, &info.name, tag)?;
        info!(service = %info.name, engine = engine.engine_type(), %compression, dir = %dir.display(), "creating snapshot");

        let result = engine
            .create(&self.context(), &info, &dir, compression, &opts.note, tag)
            .and_then(|manifest| {
                manifest.validate()?;
                manifest.save(&dir)?;
                Ok(manifest)
            });

        match result {
            Ok(manifest) => {
                info!(service = %info.name, dir = %dir.display(), "snapshot created");
                Ok(manifest)
            }
            Err(err) => {
                remove_dir_best_effort(&dir);
                Err(err)
            }
        }
    }

    /// Restore `service` from the snapshot chosen by `opts.selector`.
    ///
    /// A failed restore is not rolled back; destructive steps taken before
    /// the failure (dropped databases, replaced files) stay applied.
    pub fn restore(&self, service: &str, opts: &RestoreOptions) -> Result<SnapshotInfo> {
        let info = self.resolver.resolve(service)?;
        let engine = self.engines.lookup(&info.engine)?;
        let snapshot = self.select(&info.name, &opts.selector)?;

        let manifest = SnapshotManifest::load(&snapshot.path)?;
        manifest.validate()?;
        let recorded = self.engines.lookup(&manifest.engine)?;
        if recorded.engine_type() != engine.engine_type() {
            return Err(SnapshotError::InvalidManifest(format!(
                "snapshot was taken with engine '{}' but service '{}' uses '{}'",
                manifest.engine,
                info.name,
                engine.engine_type()
            )));
        }

        info!(service = %info.name, snapshot = %snapshot.path.display(), force = opts.force, "restoring snapshot");
        engine.restore(&self.context(), &info, &snapshot.path, &manifest, opts.force)?;
        info!(service = %info.name, "restore complete");
        Ok(snapshot)
    }

    /// Snapshots of one service, or of every service when `service` is
    /// `None`, newest first.
    pub fn list(&self, service: Option<&str>) -> Result<Vec<SnapshotInfo>> {
        let service_dirs = match service {
            Some(name) => vec![storage::service_dir(&self.root, name)],
            None => storage::child_dirs(&self.root)?,
        };

        let mut out = Vec::new();
        for service_dir in service_dirs {
            for dir in storage::child_dirs(&service_dir)? {
                match SnapshotInfo::load(&dir) {
                    Ok(info) => out.push(info),
                    Err(err) => {
                        warn!(dir = %dir.display(), error = %err, "skipping directory without a readable manifest")
                    }
                }
            }
        }
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(out)
    }

    /// Case-insensitive match over service, tag, engine, image and note.
    pub fn search(&self, query: &str) -> Result<Vec<SnapshotInfo>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|s| {
                needle.is_empty()
                    || [
                        s.service.as_str(),
                        s.tag.as_deref().unwrap_or(""),
                        s.engine.as_str(),
                        s.image.as_str(),
                        s.note.as_str(),
                    ]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect())
    }

    pub fn select(&self, service: &str, selector: &SnapshotSelector) -> Result<SnapshotInfo> {
        let snapshots = self.list(Some(service))?;
        match selector {
            SnapshotSelector::Tag(tag) => snapshots
                .into_iter()
                .find(|s| s.matches_tag(tag))
                .ok_or_else(|| {
                    SnapshotError::SnapshotNotFound(format!(
                        "no snapshot tagged '{}' for service '{}'",
                        tag, service
                    ))
                }),
            SnapshotSelector::Latest => snapshots.into_iter().next().ok_or_else(|| {
                SnapshotError::SnapshotNotFound(format!("no snapshots for service '{}'", service))
            }),
            SnapshotSelector::Before(cutoff) => snapshots
                .into_iter()
                .find(|s| s.created_at < *cutoff)
                .ok_or_else(|| {
                    SnapshotError::SnapshotNotFound(format!(
                        "no snapshot of '{}' older than {}",
                        service,
                        cutoff.to_rfc3339()
                    ))
                }),
        }
    }

    /// Keep the `keep` newest snapshots of `service` and remove the rest.
    pub fn prune(&self, service: &str, keep: usize, dry_run: bool) -> Result<PruneReport> {
        if keep == 0 {
            return Err(SnapshotError::InvalidArgument(
                "keep must be a positive number".into(),
            ));
        }
        let mut snapshots = self.list(Some(service))?;
        let removed = if snapshots.len() > keep {
            snapshots.split_off(keep)
        } else {
            Vec::new()
        };

        let mut reclaimed_bytes = 0;
        for snap in &removed {
            reclaimed_bytes += dir_size(&snap.path);
            if !dry_run {
                fs::remove_dir_all(&snap.path)?;
                info!(service, dir = %snap.path.display(), "pruned snapshot");
            }
        }
        Ok(PruneReport {
            service: service.to_string(),
            kept: snapshots.len(),
            removed,
            reclaimed_bytes,
            dry_run,
        })
    }

    /// Re-hash every file listed in the selected snapshot's manifest.
    pub fn verify(&self, service: &str, selector: &SnapshotSelector) -> Result<VerifyReport> {
        let snapshot = self.select(service, selector)?;
        let manifest = SnapshotManifest::load(&snapshot.path)?;
        manifest.validate()?;

        let mut files = Vec::with_capacity(manifest.files.len());
        for file in &manifest.files {
            let path = snapshot.path.join(&file.name);
            let status = match sha256_file(&path) {
                Ok(actual) if actual.eq_ignore_ascii_case(&file.sha256) => FileStatus::Ok,
                Ok(actual) => FileStatus::Mismatch { actual },
                Err(err) if err.kind() == io::ErrorKind::NotFound => FileStatus::Missing,
                Err(err) => return Err(err.into()),
            };
            files.push(FileCheck {
                name: file.name.clone(),
                status,
            });
        }
        Ok(VerifyReport { snapshot, files })
    }

    /// Remove the snapshot of `service` tagged `tag`.
    pub fn delete(&self, service: &str, tag: &str) -> Result<SnapshotInfo> {
        let snapshot = self.select(service, &SnapshotSelector::Tag(tag.to_string()))?;
        fs::remove_dir_all(&snapshot.path)?;
        info!(service, dir = %snapshot.path.display(), "deleted snapshot");
        Ok(snapshot)
    }

    /// Re-encode the primary artifact of a snapshot under `compression`.
    pub fn repack(
        &self,
        service: &str,
        selector: &SnapshotSelector,
        compression: Compression,
    ) -> Result<SnapshotManifest> {
        let snapshot = self.select(service, selector)?;
        let mut manifest = SnapshotManifest::load(&snapshot.path)?;
        manifest.validate()?;
        if manifest.compression == compression {
            return Ok(manifest);
        }

        let engine = self.engines.lookup(&manifest.engine)?;
        let source = verified_main_file(&snapshot.path, &manifest)?;
        let old_name = manifest.main_file()?.name.clone();
        let new_name = engine.artifact_name(compression);

        let mut reader = open_reader(&source, manifest.compression)?;
        let file = write_artifact(&snapshot.path, &new_name, self.context().codec(compression), |w| {
            io::copy(&mut reader, w).map_err(|e| SnapshotError::stream("re-encoding artifact", e))?;
            Ok(())
        })?;

        manifest.files[0] = file;
        manifest.compression = compression;
        manifest.updated_at = Some(Utc::now());
        if let Err(err) = manifest.save(&snapshot.path) {
            if new_name != old_name {
                remove_file_best_effort(&snapshot.path.join(&new_name));
            }
            return Err(err);
        }
        if new_name != old_name {
            remove_file_best_effort(&snapshot.path.join(&old_name));
        }
        info!(service, dir = %snapshot.path.display(), %compression, "repacked snapshot");
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{FakeExec, Reply};
    use std::collections::HashMap;
    use std::thread;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct StaticResolver(HashMap<String, ServiceInfo>);

    impl ServiceResolver for StaticResolver {
        fn resolve(&self, name: &str) -> Result<ServiceInfo> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| SnapshotError::UnknownService(name.to_string()))
        }

        fn services(&self) -> Result<Vec<ServiceInfo>> {
            Ok(self.0.values().cloned().collect())
        }
    }

    fn pg_service(name: &str, container: &str) -> ServiceInfo {
        ServiceInfo {
            name: name.into(),
            engine: "postgres".into(),
            container: container.into(),
            image: "postgres:16".into(),
            user: "postgres".into(),
            password: "pw".into(),
            database: "app".into(),
            host_port: Some(5432),
        }
    }

    fn resolver(services: Vec<ServiceInfo>) -> Arc<StaticResolver> {
        Arc::new(StaticResolver(
            services.into_iter().map(|s| (s.name.clone(), s)).collect(),
        ))
    }

    fn pg_fake(dump_exit: i32) -> Arc<FakeExec> {
        Arc::new(
            FakeExec::new(move |req| match req.program() {
                "pg_dump" if dump_exit == 0 => Reply::ok(b"PGDMP-payload"),
                "pg_dump" => Reply::fail(dump_exit, "pg_dump: error: connection failed"),
                _ => Reply::ok(""),
            })
            .with_running("db-pg"),
        )
    }

    fn setup(fake: Arc<FakeExec>) -> (TempDir, SnapshotService) {
        let root = tempdir().unwrap();
        let svc = SnapshotService::new(
            root.path(),
            resolver(vec![
                pg_service("db", "db-pg"),
                pg_service("stopped", "stopped-pg"),
                ServiceInfo {
                    engine: "cockroach".into(),
                    ..pg_service("odd", "db-pg")
                },
            ]),
            fake,
        );
        (root, svc)
    }

    fn create(svc: &SnapshotService, tag: &str) -> SnapshotManifest {
        let m = svc
            .create(
                "db",
                &CreateOptions {
                    tag: Some(tag.into()),
                    ..Default::default()
                },
            )
            .unwrap();
        // Keep creation timestamps strictly ordered.
        thread::sleep(Duration::from_millis(5));
        m
    }

    #[test]
    fn test_create_and_restore_scenario() {
        let fake = pg_fake(0);
        let (root, svc) = setup(fake.clone());
        let m = svc
            .create(
                "db",
                &CreateOptions {
                    tag: Some("v1".into()),
                    note: "first".into(),
                    compression: Some("zstd".into()),
                },
            )
            .unwrap();
        assert_eq!(m.files[0].name, "pg.dump.zst");
        assert_eq!(m.compression, Compression::Zstd);

        let dirs = storage::child_dirs(&root.path().join("db")).unwrap();
        assert_eq!(dirs.len(), 1);
        let dir = &dirs[0];
        assert!(dir.file_name().unwrap().to_str().unwrap().ends_with("-v1"));
        assert!(dir.join("pg.dump.zst").exists());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(json["files"][0]["name"], "pg.dump.zst");
        assert_eq!(json["compression"], "zstd");
        assert_eq!(json["note"], "first");

        let restored = svc.restore("db", &RestoreOptions::default()).unwrap();
        assert_eq!(&restored.path, dir);
        assert_eq!(fake.stdin_of("pg_restore").unwrap(), b"PGDMP-payload");
    }

    #[test]
    fn test_unset_or_invalid_compression_defaults_to_zstd() {
        let (_root, svc) = setup(pg_fake(0));
        let m = svc.create("db", &CreateOptions::default()).unwrap();
        assert_eq!(m.compression, Compression::Zstd);
        let m = svc
            .create(
                "db",
                &CreateOptions {
                    tag: Some("x".into()),
                    compression: Some("brotli".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(m.compression, Compression::Zstd);
        assert_eq!(m.files[0].name, "pg.dump.zst");
    }

    #[test]
    fn test_create_failure_removes_snapshot_directory() {
        let (root, svc) = setup(pg_fake(2));
        let err = svc.create("db", &CreateOptions::default()).unwrap_err();
        assert!(matches!(err, SnapshotError::CommandFailed { .. }));
        assert!(storage::child_dirs(&root.path().join("db")).unwrap().is_empty());
    }

    #[test]
    fn test_create_preconditions() {
        let (root, svc) = setup(pg_fake(0));
        assert!(matches!(
            svc.create("missing", &CreateOptions::default()),
            Err(SnapshotError::UnknownService(_))
        ));
        assert!(matches!(
            svc.create("odd", &CreateOptions::default()),
            Err(SnapshotError::UnsupportedEngine(_))
        ));
        assert!(matches!(
            svc.create("stopped", &CreateOptions::default()),
            Err(SnapshotError::ContainerNotRunning(_))
        ));
        assert!(storage::child_dirs(root.path()).unwrap().is_empty());
    }

    #[test]
    fn test_restore_selection() {
        let (_root, svc) = setup(pg_fake(0));
        create(&svc, "v1");
        let cutoff = Utc::now();
        thread::sleep(Duration::from_millis(5));
        create(&svc, "v2");

        let by_tag = svc.select("db", &SnapshotSelector::Tag("v1".into())).unwrap();
        assert_eq!(by_tag.tag.as_deref(), Some("v1"));
        let latest = svc.select("db", &SnapshotSelector::Latest).unwrap();
        assert_eq!(latest.tag.as_deref(), Some("v2"));
        let before = svc.select("db", &SnapshotSelector::Before(cutoff)).unwrap();
        assert_eq!(before.tag.as_deref(), Some("v1"));

        assert!(matches!(
            svc.select("db", &SnapshotSelector::Tag("v3".into())),
            Err(SnapshotError::SnapshotNotFound(_))
        ));
        let too_early = by_tag.created_at - chrono::Duration::seconds(60);
        assert!(svc.select("db", &SnapshotSelector::Before(too_early)).is_err());

        let restored = svc
            .restore(
                "db",
                &RestoreOptions {
                    selector: SnapshotSelector::Tag("v1".into()),
                    force: false,
                },
            )
            .unwrap();
        assert_eq!(restored.tag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_restore_with_no_snapshots_fails() {
        let (_root, svc) = setup(pg_fake(0));
        assert!(matches!(
            svc.restore("db", &RestoreOptions::default()),
            Err(SnapshotError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn test_restore_rejects_invalid_manifest() {
        let (_root, svc) = setup(pg_fake(0));
        create(&svc, "v1");
        let snap = svc.select("db", &SnapshotSelector::Latest).unwrap();
        let mut m = SnapshotManifest::load(&snap.path).unwrap();
        m.files.clear();
        m.save(&snap.path).unwrap();
        assert!(matches!(
            svc.restore("db", &RestoreOptions::default()),
            Err(SnapshotError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_list_sorted_newest_first_across_services() {
        let (_root, svc) = setup(pg_fake(0));
        create(&svc, "a");
        create(&svc, "b");
        create(&svc, "c");
        let all = svc.list(None).unwrap();
        let tags: Vec<_> = all.iter().map(|s| s.tag.clone().unwrap()).collect();
        assert_eq!(tags, vec!["c", "b", "a"]);
        assert!(svc.list(Some("nothing")).unwrap().is_empty());
        assert!(all.iter().all(|s| s.size > 0 && s.engine == "postgres"));
    }

    #[test]
    fn test_list_skips_directories_without_manifest() {
        let (root, svc) = setup(pg_fake(0));
        create(&svc, "a");
        fs::create_dir_all(root.path().join("db").join("20200101T000000Z-junk")).unwrap();
        assert_eq!(svc.list(Some("db")).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let (_root, svc) = setup(pg_fake(0));
        for tag in ["s0", "s1", "s2", "s3", "s4"] {
            create(&svc, tag);
        }

        assert!(matches!(
            svc.prune("db", 0, false),
            Err(SnapshotError::InvalidArgument(_))
        ));

        let dry = svc.prune("db", 2, true).unwrap();
        assert_eq!(dry.removed.len(), 3);
        assert!(dry.reclaimed_bytes > 0);
        assert_eq!(svc.list(Some("db")).unwrap().len(), 5);

        let report = svc.prune("db", 2, false).unwrap();
        assert_eq!(report.kept, 2);
        let removed: Vec<_> = report.removed.iter().map(|s| s.tag.clone().unwrap()).collect();
        assert_eq!(removed, vec!["s2", "s1", "s0"]);
        let left: Vec<_> = svc
            .list(Some("db"))
            .unwrap()
            .into_iter()
            .map(|s| s.tag.unwrap())
            .collect();
        assert_eq!(left, vec!["s4", "s3"]);

        let noop = svc.prune("db", 10, false).unwrap();
        assert!(noop.removed.is_empty());
        assert_eq!(noop.kept, 2);
    }

    #[test]
    fn test_verify_and_delete() {
        let (_root, svc) = setup(pg_fake(0));
        create(&svc, "v1");
        let report = svc.verify("db", &SnapshotSelector::Latest).unwrap();
        assert!(report.is_ok());

        fs::write(report.snapshot.path.join("pg.dump.zst"), b"garbage").unwrap();
        let report = svc.verify("db", &SnapshotSelector::Latest).unwrap();
        assert!(!report.is_ok());
        assert!(matches!(report.files[0].status, FileStatus::Mismatch { .. }));

        fs::remove_file(report.snapshot.path.join("pg.dump.zst")).unwrap();
        let report = svc.verify("db", &SnapshotSelector::Latest).unwrap();
        assert_eq!(report.files[0].status, FileStatus::Missing);

        svc.delete("db", "v1").unwrap();
        assert!(svc.list(Some("db")).unwrap().is_empty());
        assert!(svc.delete("db", "v1").is_err());
    }

    #[test]
    fn test_search() {
        let (_root, svc) = setup(pg_fake(0));
        svc.create(
            "db",
            &CreateOptions {
                tag: Some("nightly".into()),
                note: "Before schema migration".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(svc.search("MIGRATION").unwrap().len(), 1);
        assert_eq!(svc.search("night").unwrap().len(), 1);
        assert_eq!(svc.search("postgres:16").unwrap().len(), 1);
        assert!(svc.search("mongo").unwrap().is_empty());
    }

    #[test]
    fn test_manifest_pointing_outside_snapshot_is_rejected() {
        let (_root, svc) = setup(pg_fake(0));
        create(&svc, "v1");

        let outside = tempdir().unwrap();
        let victim = outside.path().join("victim.txt");
        fs::write(&victim, b"not a dump").unwrap();

        let snap = svc.select("db", &SnapshotSelector::Latest).unwrap();
        let mut m = SnapshotManifest::load(&snap.path).unwrap();
        m.files[0].name = victim.display().to_string();
        m.files[0].sha256 = sha256_file(&victim).unwrap();
        m.save(&snap.path).unwrap();

        assert!(matches!(
            svc.repack("db", &SnapshotSelector::Latest, Compression::Gzip),
            Err(SnapshotError::InvalidManifest(_))
        ));
        assert!(matches!(
            svc.verify("db", &SnapshotSelector::Latest),
            Err(SnapshotError::InvalidManifest(_))
        ));
        assert!(matches!(
            svc.restore("db", &RestoreOptions::default()),
            Err(SnapshotError::InvalidManifest(_))
        ));
        assert!(victim.exists());
    }

    #[test]
    fn test_cancelled_redis_create_is_rolled_back() {
        use crate::engines::RedisTiming;
        use crate::utils::poll::PollPolicy;
        use std::sync::atomic::{AtomicI64, Ordering};

        let clock = Arc::new(AtomicI64::new(1_700_000_000));
        let fake = Arc::new(
            FakeExec::new(move |req| {
                let args: Vec<&str> = req.args.iter().map(String::as_str).collect();
                match args.as_slice() {
                    ["redis-cli", "LASTSAVE"] => {
                        Reply::ok(clock.fetch_add(1, Ordering::SeqCst).to_string())
                    }
                    ["redis-cli", "BGSAVE"] => Reply::ok("Background saving started"),
                    ["redis-cli", "CONFIG", ..] => Reply::fail(1, "ERR unknown command"),
                    ["cat", "/data/dump.rdb"] => Reply::ok(b"REDIS0011"),
                    _ => Reply::fail(1, "unexpected"),
                }
            })
            .with_running("cache-1"),
        );
        let root = tempdir().unwrap();
        let policy = PollPolicy::new(Duration::from_millis(2), Duration::from_millis(100));
        let svc = SnapshotService::new(
            root.path(),
            resolver(vec![ServiceInfo {
                name: "cache".into(),
                engine: "redis".into(),
                container: "cache-1".into(),
                image: "redis:7".into(),
                user: String::new(),
                password: String::new(),
                database: String::new(),
                host_port: None,
            }]),
            fake,
        )
        .with_engines(EngineRegistry::new(RedisTiming {
            save: policy,
            ready: policy,
        }));

        let m = svc.create("cache", &CreateOptions::default()).unwrap();
        assert_eq!(m.files[0].name, "redis.rdb.zst");
        assert_eq!(m.engine, "redis");

        svc.cancel_token().cancel();
        let err = svc
            .create(
                "cache",
                &CreateOptions {
                    tag: Some("late".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Cancelled(_)));
        assert_eq!(svc.list(Some("cache")).unwrap().len(), 1);
        assert_eq!(storage::child_dirs(&svc.root().join("cache")).unwrap().len(), 1);
    }

    #[test]
    fn test_repack_changes_compression() {
        let fake = pg_fake(0);
        let (_root, svc) = setup(fake.clone());
        create(&svc, "v1");

        let m = svc
            .repack("db", &SnapshotSelector::Latest, Compression::Gzip)
            .unwrap();
        assert_eq!(m.compression, Compression::Gzip);
        assert_eq!(m.files[0].name, "pg.dump.gz");
        assert!(m.updated_at.is_some());

        let snap = svc.select("db", &SnapshotSelector::Latest).unwrap();
        assert!(snap.path.join("pg.dump.gz").exists());
        assert!(!snap.path.join("pg.dump.zst").exists());
        assert!(svc.verify("db", &SnapshotSelector::Latest).unwrap().is_ok());

        let same = svc
            .repack("db", &SnapshotSelector::Latest, Compression::Gzip)
            .unwrap();
        assert_eq!(same, m);

        svc.restore("db", &RestoreOptions::default()).unwrap();
        assert_eq!(fake.stdin_of("pg_restore").unwrap(), b"PGDMP-payload");
    }
}
