//! Redis snapshots via BGSAVE.
//!
//! Redis persists asynchronously, so capture is a small state machine:
//! trigger BGSAVE, poll `LASTSAVE` / `rdb_bgsave_in_progress` until the save
//! lands (or the deadline passes), then copy the RDB file out of the
//! container. Restore stops the container, replaces the RDB file, starts it
//! again and waits for `PING` to answer.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    Engine, EngineContext, artifact_file_name, check_dump, ensure_running, verified_main_file,
    write_artifact,
};
use crate::codec::{Compression, open_reader};
use crate::config::{ServiceInfo, SnapshotManifest};
use crate::error::{Result, SnapshotError};
use crate::exec::ExecRequest;
use crate::utils::poll::{PollPolicy, poll_until};

const DEFAULT_RDB_PATH: &str = "/data/dump.rdb";

/// Poll intervals and deadlines for the BGSAVE wait and the post-restart
/// readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisTiming {
    pub save: PollPolicy,
    pub ready: PollPolicy,
}

impl Default for RedisTiming {
    fn default() -> Self {
        Self {
            save: PollPolicy::new(Duration::from_secs(1), Duration::from_secs(5 * 60)),
            ready: PollPolicy::new(Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RedisEngine {
    timing: RedisTiming,
}

impl RedisEngine {
    pub fn new(timing: RedisTiming) -> Self {
        Self { timing }
    }

    fn cli(&self, service: &ServiceInfo, args: &[&str]) -> ExecRequest {
        let mut req = ExecRequest::new(&service.container, ["redis-cli"]);
        for a in args {
            req = req.arg(*a);
        }
        if service.password.is_empty() {
            req
        } else {
            req.env("REDISCLI_AUTH", &service.password)
        }
    }

    /// Run a redis-cli command that must succeed; returns trimmed stdout.
    fn query(&self, ctx: &EngineContext<'_>, service: &ServiceInfo, args: &[&str]) -> Result<String> {
        let req = self.cli(service, args);
        let out = ctx.exec.exec(&req)?;
        if !out.success() {
            return Err(SnapshotError::command(
                format!("redis-cli {}", args.join(" ")),
                out.exit_code,
                out.combined(),
            ));
        }
        Ok(out.stdout.trim().to_string())
    }

    fn last_save(&self, ctx: &EngineContext<'_>, service: &ServiceInfo) -> Result<i64> {
        let raw = self.query(ctx, service, &["LASTSAVE"])?;
        parse_integer(&raw).ok_or_else(|| {
            SnapshotError::command("redis-cli LASTSAVE", 0, format!("unexpected reply: {}", raw))
        })
    }

    /// Trigger BGSAVE and wait for it to finish.
    fn background_save(&self, ctx: &EngineContext<'_>, service: &ServiceInfo) -> Result<()> {
        let before = self.last_save(ctx, service)?;
        let ack = self.query(ctx, service, &["BGSAVE"])?;
        if !is_bgsave_ack(&ack) {
            return Err(SnapshotError::command("redis-cli BGSAVE", 0, ack));
        }
        debug!(service = %service.name, before, "BGSAVE triggered");

        // A scheduled save has not started yet, so the in-progress flag only
        // counts once it has been seen set and then cleared.
        let mut seen_running = false;
        poll_until("redis BGSAVE", self.timing.save, ctx.cancel, |attempt| {
            let now = self.last_save(ctx, service)?;
            if now != before {
                return Ok(Some(()));
            }
            let info = self.query(ctx, service, &["INFO", "persistence"])?;
            match bgsave_in_progress(&info) {
                Some(true) => seen_running = true,
                Some(false) if seen_running => return Ok(Some(())),
                _ => {}
            }
            debug!(attempt, seen_running, "BGSAVE still pending");
            Ok(None)
        })
    }

    /// Location of the RDB file inside the container.
    fn rdb_path(&self, ctx: &EngineContext<'_>, service: &ServiceInfo) -> String {
        let dir = self.config_get(ctx, service, "dir");
        let file = self.config_get(ctx, service, "dbfilename");
        match (dir, file) {
            (Some(dir), Some(file)) => format!("{}/{}", dir.trim_end_matches('/'), file),
            _ => {
                debug!(service = %service.name, path = DEFAULT_RDB_PATH, "using default RDB path");
                DEFAULT_RDB_PATH.to_string()
            }
        }
    }

    fn config_get(&self, ctx: &EngineContext<'_>, service: &ServiceInfo, key: &str) -> Option<String> {
        match self.query(ctx, service, &["CONFIG", "GET", key]) {
            Ok(reply) => config_value(&reply),
            Err(err) => {
                warn!(service = %service.name, key, error = %err, "CONFIG GET failed");
                None
            }
        }
    }

    fn wait_ready(&self, ctx: &EngineContext<'_>, service: &ServiceInfo) -> Result<()> {
        poll_until("redis PING", self.timing.ready, ctx.cancel, |_| {
            let req = self.cli(service, &["PING"]);
            Ok(match ctx.exec.exec(&req) {
                Ok(out) if out.success() && out.stdout.contains("PONG") => Some(()),
                _ => None,
            })
        })
    }
}

impl Engine for RedisEngine {
    fn engine_type(&self) -> &'static str {
        "redis"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["redis"]
    }

    fn artifact_name(&self, compression: Compression) -> String {
        artifact_file_name("redis", ".rdb", compression)
    }

    fn create(
        &self,
        ctx: &EngineContext<'_>,
        service: &ServiceInfo,
        output_dir: &Path,
        compression: Compression,
        note: &str,
        tag: Option<&str>,
    ) -> Result<SnapshotManifest> {
        let mut manifest = SnapshotManifest::new(
            &service.name,
            self.engine_type(),
            &service.image,
            compression,
            note,
            tag,
        );

        self.background_save(ctx, service)?;
        let rdb = self.rdb_path(ctx, service);
        info!(service = %service.name, path = %rdb, "BGSAVE complete, copying RDB");

        let req = ExecRequest::new(&service.container, ["cat", rdb.as_str()]);
        let name = self.artifact_name(compression);
        let file = write_artifact(output_dir, &name, ctx.codec(compression), |w| {
            let out = ctx.exec.exec_stream(&req, None, w)?;
            check_dump("reading redis RDB", &out)
        })?;
        info!(service = %service.name, file = %file.name, size = file.size, "redis snapshot complete");
        manifest.files.push(file);
        Ok(manifest)
    }

    fn restore(
        &self,
        ctx: &EngineContext<'_>,
        service: &ServiceInfo,
        snapshot_dir: &Path,
        manifest: &SnapshotManifest,
        _force: bool,
    ) -> Result<()> {
        let path = verified_main_file(snapshot_dir, manifest)?;
        ensure_running(ctx, service)?;

        if let Err(err) = self.query(ctx, service, &["BGSAVE"]) {
            warn!(service = %service.name, error = %err, "pre-restore BGSAVE failed; continuing");
        }
        let rdb = self.rdb_path(ctx, service);

        // Decompress before touching the container so a bad archive stops early.
        let mut staged = tempfile::NamedTempFile::new()?;
        let mut reader = open_reader(&path, manifest.compression)?;
        io::copy(&mut reader, staged.as_file_mut())
            .map_err(|e| SnapshotError::stream("decompressing redis RDB", e))?;
        staged.as_file().sync_all()?;
        debug!(size = fs::metadata(staged.path())?.len(), "staged RDB");

        ctx.exec.stop(&service.container)?;
        ctx.exec.copy_into(&service.container, staged.path(), &rdb)?;
        ctx.exec.start(&service.container)?;
        self.wait_ready(ctx, service)?;

        info!(service = %service.name, "redis restore complete");
        Ok(())
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    raw.trim().trim_start_matches("(integer)").trim().parse().ok()
}

fn is_bgsave_ack(reply: &str) -> bool {
    reply.contains("Background saving started") || reply.contains("Background saving scheduled")
}

/// `rdb_bgsave_in_progress` from `INFO persistence`, if present.
fn bgsave_in_progress(info: &str) -> Option<bool> {
    info.lines().find_map(|line| {
        let value = line.trim().strip_prefix("rdb_bgsave_in_progress:")?;
        Some(value.trim() != "0")
    })
}

/// Second line of a `CONFIG GET <key>` reply.
fn config_value(reply: &str) -> Option<String> {
    let value = reply.lines().nth(1)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
