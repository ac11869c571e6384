use std::path::Path;
use tracing::info;

use super::{
    Engine, EngineContext, artifact_file_name, check_dump, check_restore, ensure_running,
    marker_lines, verified_main_file, write_artifact,
};
use crate::codec::{Compression, open_reader};
use crate::config::{ServiceInfo, SnapshotManifest};
use crate::error::Result;
use crate::exec::{ExecOutput, ExecRequest};

const DEFAULT_USER: &str = "postgres";
const ERROR_MARKERS: &[&str] = &["ERROR", "FATAL"];

/// Custom-format `pg_dump` / `pg_restore` streamed through the codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresEngine;

impl PostgresEngine {
    fn request(&self, service: &ServiceInfo, args: Vec<String>) -> ExecRequest {
        let req = ExecRequest::new(&service.container, args);
        if service.password.is_empty() {
            req
        } else {
            req.env("PGPASSWORD", &service.password)
        }
    }

    fn dump_args(&self, service: &ServiceInfo) -> Vec<String> {
        let user = service.user_or(DEFAULT_USER);
        vec![
            "pg_dump".into(),
            "-U".into(),
            user.into(),
            "-d".into(),
            service.database_or(user).into(),
            "-Fc".into(),
            "--no-password".into(),
        ]
    }

    fn restore_args(&self, service: &ServiceInfo, force: bool) -> Vec<String> {
        let user = service.user_or(DEFAULT_USER);
        let mut args: Vec<String> = vec![
            "pg_restore".into(),
            "-U".into(),
            user.into(),
            "-d".into(),
            service.database_or(user).into(),
            "--clean".into(),
            "--if-exists".into(),
            "--no-owner".into(),
            "--no-password".into(),
        ];
        if force {
            args.push("--single-transaction".into());
        }
        args
    }
}

impl Engine for PostgresEngine {
    fn engine_type(&self) -> &'static str {
        "postgres"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["postgres", "postgresql"]
    }

    fn artifact_name(&self, compression: Compression) -> String {
        artifact_file_name("pg", ".dump", compression)
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
        let req = self.request(service, self.dump_args(service));
        let name = self.artifact_name(compression);
        let file = write_artifact(output_dir, &name, ctx.codec(compression), |w| {
            let out = ctx.exec.exec_stream(&req, None, w)?;
            check_dump("pg_dump", &out)
        })?;
        info!(service = %service.name, file = %file.name, size = file.size, "postgres dump complete");
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

        let req = self.request(service, self.restore_args(service, force));
        let mut reader = open_reader(&path, manifest.compression)?;
        let mut captured = Vec::new();
        let mut out = ctx.exec.exec_stream(&req, Some(&mut reader), &mut captured)?;
        out.stdout = String::from_utf8_lossy(&captured).into_owned();

        check_output(&out, force)?;
        info!(service = %service.name, "postgres restore complete");
        Ok(())
    }
}

fn check_output(out: &ExecOutput, force: bool) -> Result<()> {
    let text = out.combined();
    let errors = marker_lines(&text, ERROR_MARKERS, false);
    check_restore("pg_restore", out, &errors, force)
}
