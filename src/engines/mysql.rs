use std::path::Path;
use tracing::info;

use super::{
    Engine, EngineContext, artifact_file_name, check_dump, check_restore, ensure_running,
    marker_lines, verified_main_file, write_artifact,
};
use crate::codec::{Compression, open_reader};
use crate::config::{ServiceInfo, SnapshotManifest};
use crate::error::Result;
use crate::exec::ExecRequest;

const DEFAULT_USER: &str = "root";

/// `mysqldump` / `mysql` streamed through the codec. MariaDB speaks the same
/// client protocol and ships compatible tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlEngine;

impl MySqlEngine {
    fn request(&self, service: &ServiceInfo, args: Vec<String>) -> ExecRequest {
        let req = ExecRequest::new(&service.container, args);
        if service.password.is_empty() {
            req
        } else {
            req.env("MYSQL_PWD", &service.password)
        }
    }

    fn dump_args(&self, service: &ServiceInfo) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "mysqldump".into(),
            "-u".into(),
            service.user_or(DEFAULT_USER).into(),
            "--single-transaction".into(),
            "--quick".into(),
            "--routines".into(),
            "--triggers".into(),
            "--events".into(),
        ];
        if service.database.is_empty() {
            args.push("--all-databases".into());
        } else {
            args.push("--databases".into());
            args.push(service.database.clone());
        }
        args
    }

    fn restore_args(&self, service: &ServiceInfo, force: bool) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "mysql".into(),
            "-u".into(),
            service.user_or(DEFAULT_USER).into(),
        ];
        if force {
            args.push("--force".into());
        }
        args
    }
}

impl Engine for MySqlEngine {
    fn engine_type(&self) -> &'static str {
        "mysql"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mysql", "mariadb"]
    }

    fn artifact_name(&self, compression: Compression) -> String {
        artifact_file_name("mysql", ".dump", compression)
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
            check_dump("mysqldump", &out)
        })?;
        info!(service = %service.name, file = %file.name, size = file.size, "mysql dump complete");
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

        let text = out.combined();
        let errors = marker_lines(&text, &["ERROR"], false);
        check_restore("mysql", &out, &errors, force)?;
        info!(service = %service.name, "mysql restore complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{Event, FakeExec, Reply};
    use crate::utils::poll::CancelToken;
    use tempfile::tempdir;

    fn service(database: &str) -> ServiceInfo {
        ServiceInfo {
            name: "shop".into(),
            engine: "mariadb".into(),
            container: "shop-db".into(),
            image: "mariadb:11".into(),
            user: String::new(),
            password: "secret".into(),
            database: database.into(),
            host_port: None,
        }
    }

    #[test]
    fn test_aliases() {
        let e = MySqlEngine;
        assert!(e.can_handle("mysql"));
        assert!(e.can_handle("mariadb"));
        assert!(!e.can_handle("postgres"));
        assert_eq!(e.engine_type(), "mysql");
        assert_eq!(e.artifact_name(Compression::Zstd), "mysql.dump.zst");
    }

    #[test]
    fn test_dump_scope_follows_database() {
        let e = MySqlEngine;
        assert!(e.dump_args(&service("")).contains(&"--all-databases".to_string()));
        let args = e.dump_args(&service("shop"));
        assert!(args.ends_with(&["--databases".to_string(), "shop".to_string()]));
        assert!(args.contains(&"root".to_string()));
    }

    #[test]
    fn test_round_trip_and_password_via_env() {
        let dir = tempdir().unwrap();
        let fake = FakeExec::new(|req| match req.program() {
            "mysqldump" => Reply::ok(b"CREATE TABLE t (id int);"),
            _ => Reply::ok(""),
        })
        .with_running("shop-db");
        let cancel = CancelToken::new();
        let ctx = EngineContext::new(&fake, &cancel);
        let m = MySqlEngine
            .create(&ctx, &service("shop"), dir.path(), Compression::Gzip, "", None)
            .unwrap();
        MySqlEngine
            .restore(&ctx, &service("shop"), dir.path(), &m, false)
            .unwrap();

        assert_eq!(fake.stdin_of("mysql").unwrap(), b"CREATE TABLE t (id int);");
        for event in fake.events() {
            if let Event::Exec { args, .. } = event {
                assert!(!args.iter().any(|a| a.contains("secret")));
            }
        }
    }

    #[test]
    fn test_restore_errors_fail_without_force() {
        let dir = tempdir().unwrap();
        let fake = FakeExec::new(|req| match req.program() {
            "mysqldump" => Reply::ok(b"dump"),
            _ => Reply::fail(1, "ERROR 1050 (42S01) at line 3: Table 't' already exists"),
        })
        .with_running("shop-db");
        let cancel = CancelToken::new();
        let ctx = EngineContext::new(&fake, &cancel);
        let m = MySqlEngine
            .create(&ctx, &service("shop"), dir.path(), Compression::None, "", None)
            .unwrap();
        assert!(MySqlEngine.restore(&ctx, &service("shop"), dir.path(), &m, false).is_err());
        assert!(MySqlEngine.restore(&ctx, &service("shop"), dir.path(), &m, true).is_ok());
        assert!(MySqlEngine.restore_args(&service("shop"), true).contains(&"--force".to_string()));
    }
}
