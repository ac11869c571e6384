//! Snapshot and restore for databases running in containers.

pub mod codec;
pub mod config;
pub mod engines;
pub mod error;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod service;
pub mod storage;
pub mod utils;

pub use codec::Compression;
pub use config::{ServiceInfo, Settings, SnapshotInfo, SnapshotManifest};
pub use error::{Result, SnapshotError};
pub use exec::{ContainerExec, DockerCli};
pub use registry::{ServiceRegistry, ServiceResolver};
pub use service::{
    CreateOptions, PruneReport, RestoreOptions, SnapshotSelector, SnapshotService, VerifyReport,
};
