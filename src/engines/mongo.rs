use std::path::Path;
use tracing::{info, warn};

use super::{
    Engine, EngineContext, artifact_file_name, check_dump, check_restore, ensure_running,
    marker_lines, verified_main_file, write_artifact,
};
use crate::codec::{Compression, open_reader};
use crate::config::{ServiceInfo, SnapshotManifest};
use crate::error::{Result, SnapshotError};
use crate::exec::{ExecOutput, ExecRequest};

const AUTH_DATABASE: &str = "admin";

/// `mongodump --archive --gzip` streamed through the codec. The archive is
/// already gzip-compressed by the tool; the artifact codec adds its own layer
/// on top.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoEngine;

impl MongoEngine {
    fn auth_args(&self, service: &ServiceInfo) -> Vec<String> {
        if service.user.is_empty() {
            return Vec::new();
        }
        let mut args: Vec<String> = vec!["--username".into(), service.user.clone()];
        if !service.password.is_empty() {
            args.push("--password".into());
            args.push(service.password.clone());
        }
        args.push("--authenticationDatabase".into());
        args.push(AUTH_DATABASE.into());
        args
    }

    fn dump_args(&self, service: &ServiceInfo) -> Vec<String> {
        let mut args: Vec<String> = vec!["mongodump".into(), "--archive".into(), "--gzip".into()];
        if !service.database.is_empty() {
            args.push("--db".into());
            args.push(service.database.clone());
        }
        args.extend(self.auth_args(service));
        args
    }

    fn restore_args(&self, service: &ServiceInfo) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "mongorestore".into(),
            "--archive".into(),
            "--gzip".into(),
            "--drop".into(),
            "--stopOnError".into(),
        ];
        if !service.database.is_empty() {
            args.push("--nsInclude".into());
            args.push(format!("{}.*", service.database));
        }
        args.extend(self.auth_args(service));
        args
    }

    fn drop_database(&self, ctx: &EngineContext<'_>, service: &ServiceInfo) -> Result<()> {
        if service.database.is_empty() {
            warn!(service = %service.name, "no database configured; skipping drop");
            return Ok(());
        }
        let script = format!(
            "db.getSiblingDB('{}').dropDatabase()",
            service.database.replace('\'', "\\'")
        );
        let mut args: Vec<String> = vec!["mongosh".into(), "--quiet".into()];
        args.extend(self.auth_args(service));
        args.push("--eval".into());
        args.push(script);

        let out = ctx.exec.exec(&ExecRequest::new(&service.container, args))?;
        if !out.success() {
            return Err(SnapshotError::command("dropping mongo database", out.exit_code, out.combined()));
        }
        info!(service = %service.name, database = %service.database, "dropped database before restore");
        Ok(())
    }
}

impl Engine for MongoEngine {
    fn engine_type(&self) -> &'static str {
        "mongodb"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mongo", "mongodb"]
    }

    fn artifact_name(&self, compression: Compression) -> String {
        artifact_file_name("mongo", ".archive", compression)
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
        let req = ExecRequest::new(&service.container, self.dump_args(service));
        let name = self.artifact_name(compression);
        let file = write_artifact(output_dir, &name, ctx.codec(compression), |w| {
            let out = ctx.exec.exec_stream(&req, None, w)?;
            check_dump("mongodump", &out)
        })?;
        info!(service = %service.name, file = %file.name, size = file.size, "mongo dump complete");
        manifest.files.push(file);
        Ok(manifest)
    }

    fn restore(
        &self,
        ctx: &EngineContext<'_>,
        service: &ServiceInfo,
        snapshot_dir: &Path,
        manifest: &SnapshotManifest,
        force: bool,
    ) -> Result<()> {
        let path = verified_main_file(snapshot_dir, manifest)?;
        ensure_running(ctx, service)?;

        if force {
            self.drop_database(ctx, service)?;
        }

        let req = ExecRequest::new(&service.container, self.restore_args(service));
        let mut reader = open_reader(&path, manifest.compression)?;
        let mut captured = Vec::new();
        let mut out = ctx.exec.exec_stream(&req, Some(&mut reader), &mut captured)?;
        out.stdout = String::from_utf8_lossy(&captured).into_owned();

        check_output(&out, force)?;
        info!(service = %service.name, "mongo restore complete");
        Ok(())
    }
}

fn check_output(out: &ExecOutput, force: bool) -> Result<()> {
    let text = out.combined();
    // mongorestore always prints a "N document(s) failed to restore" summary.
    let errors: Vec<&str> = marker_lines(&text, &["error", "failed"], true)
        .into_iter()
        .filter(|line| !line.contains(" 0 document(s) failed"))
        .collect();
    check_restore("mongorestore", out, &errors, force)
}
