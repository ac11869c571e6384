pub mod manifest;
pub mod service;
pub mod settings;

pub use manifest::{SnapshotFile, SnapshotInfo, SnapshotManifest};
pub use service::ServiceInfo;
pub use settings::Settings;
