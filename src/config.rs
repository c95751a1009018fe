//! Deployment configuration.
//!
//! Read from `~/.config/rpi-deploy-sync/deploy.toml` (platform config dir)
//! unless a path is given:
//!
//! ```toml
//! [host]
//! hostname = "raspberrypi.local"
//! username = "pi"
//! identity_file = "~/.ssh/id_ed25519"
//!
//! [sync]
//! local_root = "/home/me/projects/app"
//! remote_root = "/home/pi/app"
//! exclude = [".venv", ".git", "__pycache__"]
//! prune_stat_policy = "lenient"
//! ```

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::{ExclusionSet, PruneStatPolicy, SyncOptions};

/// Environment variable consulted when the config file has no password.
pub const PASSWORD_ENV: &str = "RPI_SYNC_PASSWORD";

const CONFIG_FILE_NAME: &str = "deploy.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Could not determine the user config directory")]
    NoConfigDir,
}

/// SSH endpoint of the deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl HostConfig {
    /// Password from the file, else from [`PASSWORD_ENV`].
    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
            .filter(|p| !p.is_empty())
    }

    /// Identity file with a leading `~/` expanded to the local home directory.
    pub fn identity_path(&self) -> Option<PathBuf> {
        let path = self.identity_file.as_ref()?;
        match path.strip_prefix("~") {
            Ok(rest) => BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(rest))
                .or_else(|| Some(path.clone())),
            Err(_) => Some(path.clone()),
        }
    }
}

/// What to mirror and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSection {
    /// Required. A relative path is taken relative to the working directory
    /// of the process, never to the config file.
    pub local_root: PathBuf,
    pub remote_root: String,
    #[serde(default = "ExclusionSet::with_defaults")]
    pub exclude: ExclusionSet,
    #[serde(default)]
    pub prune_stat_policy: PruneStatPolicy,
}

/// Full deployment configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub host: HostConfig,
    pub sync: SyncSection,
}

impl DeployConfig {
    /// Default config location in the platform config directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("", "", "rpi-deploy-sync")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), host = %config.host.hostname, "loaded deploy config");
        Ok(config)
    }

    /// Check required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid("host.hostname is empty".into()));
        }
        if self.host.username.trim().is_empty() {
            return Err(ConfigError::Invalid("host.username is empty".into()));
        }
        if self.sync.local_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("sync.local_root is empty".into()));
        }
        if self.sync.remote_root.trim().is_empty() {
            return Err(ConfigError::Invalid("sync.remote_root is empty".into()));
        }
        if self.host.port == 0 {
            return Err(ConfigError::Invalid("host.port must be non-zero".into()));
        }
        Ok(())
    }

    /// Options for one synchronization call.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::new(&self.sync.local_root, &self.sync.remote_root)
            .with_exclusions(self.sync.exclude.clone())
            .with_prune_stat_policy(self.sync.prune_stat_policy)
    }

    /// Copy with the password masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.host.password.is_some() {
            copy.host.password = Some("********".into());
        }
        copy
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Refuse a mirror whose local tree contains the config file itself, unless
/// an exclusion keeps it out. The file may hold the SSH password.
pub fn ensure_config_not_mirrored(config_path: &Path, options: &SyncOptions) -> Result<(), ConfigError> {
    let (Ok(config_path), Ok(local_root)) = (config_path.canonicalize(), options.local_root.canonicalize())
    else {
        return Ok(());
    };
    if config_path.starts_with(&local_root) && !options.exclusions.excludes_local(&config_path) {
        return Err(ConfigError::Invalid(format!(
            "config file {} is inside local_root {} and would be uploaded; move it or add it to sync.exclude",
            config_path.display(),
            local_root.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::DEFAULT_EXCLUDES;

    const MINIMAL: &str = r#"
[host]
hostname = "raspberrypi.local"
username = "pi"

[sync]
local_root = "/srv/src/app"
remote_root = "/home/pi/app"
"#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DeployConfig::load(&write_config(tmp.path(), MINIMAL)).unwrap();
        assert_eq!(config.host.port, 22);
        assert_eq!(config.host.connect_timeout_secs, 10);
        assert_eq!(config.sync.exclude.len(), DEFAULT_EXCLUDES.len());
        assert_eq!(config.sync.prune_stat_policy, PruneStatPolicy::Lenient);
        assert_eq!(config.sync.local_root, PathBuf::from("/srv/src/app"));
    }

    #[test]
    fn test_local_root_is_required() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = MINIMAL.replace("local_root = \"/srv/src/app\"\n", "");
        let err = DeployConfig::load(&write_config(tmp.path(), &content)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("local_root"));
    }

    #[test]
    fn test_relative_local_root_not_anchored_to_config_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = MINIMAL.replace("/srv/src/app", ".");
        let config = DeployConfig::load(&write_config(tmp.path(), &content)).unwrap();
        assert_eq!(config.sync.local_root, PathBuf::from("."));
        assert_ne!(config.sync.local_root, tmp.path().join("."));
    }

    #[test]
    fn test_config_inside_local_root_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(tmp.path(), MINIMAL);
        let options = SyncOptions::new(tmp.path(), "/home/pi/app")
            .with_exclusions(ExclusionSet::with_defaults());

        let err = ensure_config_not_mirrored(&path, &options).unwrap_err();
        assert!(err.to_string().contains("would be uploaded"));

        let excluded = options.clone().with_exclusions(["deploy.toml"].into_iter().collect());
        ensure_config_not_mirrored(&path, &excluded).unwrap();

        let elsewhere = tempfile::TempDir::new().unwrap();
        let outside = SyncOptions::new(elsewhere.path(), "/home/pi/app");
        ensure_config_not_mirrored(&path, &outside).unwrap();
    }

    #[test]
    fn test_explicit_fields() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = r#"
[host]
hostname = "10.0.0.5"
port = 2222
username = "deploy"
password = "secret"

[sync]
local_root = "/opt/src"
remote_root = "app"
exclude = ["node_modules"]
prune_stat_policy = "strict"
"#;
        let config = DeployConfig::load(&write_config(tmp.path(), content)).unwrap();
        assert_eq!(config.host.port, 2222);
        assert_eq!(config.host.resolved_password().as_deref(), Some("secret"));
        assert_eq!(config.sync.local_root, PathBuf::from("/opt/src"));
        assert_eq!(config.sync.exclude.iter().collect::<Vec<_>>(), vec!["node_modules"]);

        let options = config.sync_options();
        assert_eq!(options.remote_root, "app");
        assert_eq!(options.prune_stat_policy, PruneStatPolicy::Strict);
        assert!(!options.dry_run);
    }

    #[test]
    fn test_missing_file() {
        let err = DeployConfig::load(Path::new("/no/such/deploy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = DeployConfig::load(&write_config(tmp.path(), "[host\nbroken")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validation_rejects_empty_remote_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = MINIMAL.replace("/home/pi/app", " ");
        let err = DeployConfig::load(&write_config(tmp.path(), &content)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid config: sync.remote_root is empty");
    }

    #[test]
    fn test_redacted_masks_password() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = MINIMAL.replace("username = \"pi\"", "username = \"pi\"\npassword = \"hunter2\"");
        let config = DeployConfig::load(&write_config(tmp.path(), &content)).unwrap();
        let shown = config.redacted().to_toml().unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("********"));
    }

    #[test]
    fn test_identity_path_absolute_untouched() {
        let host = HostConfig {
            hostname: "h".into(),
            port: 22,
            username: "u".into(),
            password: None,
            identity_file: Some(PathBuf::from("/keys/id_rsa")),
            connect_timeout_secs: 10,
        };
        assert_eq!(host.identity_path(), Some(PathBuf::from("/keys/id_rsa")));
    }
}
