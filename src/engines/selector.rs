use std::path::Path;

use super::{Engine, EngineContext, MongoEngine, MySqlEngine, PostgresEngine, RedisEngine, RedisTiming};
use crate::codec::Compression;
use crate::config::{ServiceInfo, SnapshotManifest};
use crate::error::{Result, SnapshotError};

/// The closed set of supported engines.
#[derive(Debug, Clone, Copy)]
pub enum DatabaseEngine {
    Postgres(PostgresEngine),
    MySql(MySqlEngine),
    Redis(RedisEngine),
    Mongo(MongoEngine),
}

macro_rules! dispatch {
    ($self:ident, $e:ident => $body:expr) => {
        match $self {
            DatabaseEngine::Postgres($e) => $body,
            DatabaseEngine::MySql($e) => $body,
            DatabaseEngine::Redis($e) => $body,
            DatabaseEngine::Mongo($e) => $body,
        }
    };
}

impl Engine for DatabaseEngine {
    fn engine_type(&self) -> &'static str {
        dispatch!(self, e => e.engine_type())
    }

    fn aliases(&self) -> &'static [&'static str] {
        dispatch!(self, e => e.aliases())
    }

    fn artifact_name(&self, compression: Compression) -> String {
        dispatch!(self, e => e.artifact_name(compression))
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
        dispatch!(self, e => e.create(ctx, service, output_dir, compression, note, tag))
    }

    fn restore(
        &self,
        ctx: &EngineContext<'_>,
        service: &ServiceInfo,
        snapshot_dir: &Path,
        manifest: &SnapshotManifest,
        force: bool,
    ) -> Result<()> {
        dispatch!(self, e => e.restore(ctx, service, snapshot_dir, manifest, force))
    }
}

/// Engines available to a service instance, matched by alias.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    engines: Vec<DatabaseEngine>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(RedisTiming::default())
    }
}

impl EngineRegistry {
    pub fn new(redis_timing: RedisTiming) -> Self {
        Self {
            engines: vec![
                DatabaseEngine::Postgres(PostgresEngine),
                DatabaseEngine::MySql(MySqlEngine),
                DatabaseEngine::Redis(RedisEngine::new(redis_timing)),
                DatabaseEngine::Mongo(MongoEngine),
            ],
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&DatabaseEngine> {
        self.engines
            .iter()
            .find(|e| e.can_handle(name))
            .ok_or_else(|| SnapshotError::UnsupportedEngine(name.to_string()))
    }

    pub fn engines(&self) -> &[DatabaseEngine] {
        &self.engines
    }
}
