pub mod config;
pub mod sync;

pub use config::{ConfigError, DeployConfig, HostConfig};
pub use sync::{ExclusionSet, SyncEngine, SyncError, SyncOptions, SyncReport};
