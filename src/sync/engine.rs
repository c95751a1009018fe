//! One synchronization call: prune stale remote state, then push new and
//! changed files, over a single transfer session.
//!
//! # Safety
//!
//! Pruning always runs to completion before any upload starts, so a prune
//! pass can never delete content uploaded in the same call. There is no
//! rollback: a fatal error leaves whatever was already transferred in place.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpi_deploy_sync::sync::{ExclusionSet, SyncEngine, SyncOptions};
//!
//! let options = SyncOptions::new("./app", "/home/pi/app")
//!     .with_exclusions(ExclusionSet::with_defaults());
//! let engine = SyncEngine::new(options);
//! let report = engine.sync_over_ssh(&connection)?;
//! println!("{} files transferred", report.files_transferred());
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::exclude::ExclusionSet;
use super::remote::{RemoteError, RemoteFs};
use super::sftp::{SftpSession, SshConnection};
use super::{prune, upload};

/// Errors that abort a synchronization call.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local root is not a directory: {}", .0.display())]
    LocalRootMissing(PathBuf),

    #[error("Local filesystem error at {}: {source}", path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot stat remote entry {path} while pruning: {source}")]
    PruneStat {
        path: String,
        #[source]
        source: RemoteError,
    },

    /// Remote failures are passed through untouched.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SyncError {
    pub(crate) fn local(path: &Path, source: std::io::Error) -> Self {
        Self::Local {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What pruning does when a remote child cannot be stat'ed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PruneStatPolicy {
    /// Skip the child, record it in the report and carry on with siblings.
    #[default]
    Lenient,
    /// Abort the call.
    Strict,
}

/// Explicit inputs of one synchronization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub local_root: PathBuf,
    /// Forward-slash remote path. Created on demand.
    pub remote_root: String,
    pub exclusions: ExclusionSet,
    pub prune_stat_policy: PruneStatPolicy,
    /// List and stat only; never mutate the remote tree.
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            exclusions: ExclusionSet::new(),
            prune_stat_policy: PruneStatPolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_prune_stat_policy(mut self, policy: PruneStatPolicy) -> Self {
        self.prune_stat_policy = policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of one synchronization call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub local_root: PathBuf,
    pub remote_root: String,
    pub dry_run: bool,
    /// Files uploaded because no remote copy existed.
    pub new_files: u64,
    /// Files uploaded because the local copy was newer.
    pub updated_files: u64,
    pub unchanged_files: u64,
    /// Local and remote entries skipped by the exclusion set.
    pub excluded_entries: u64,
    pub dirs_created: u64,
    pub files_removed: u64,
    pub dirs_removed: u64,
    pub bytes_transferred: u64,
    /// Remote paths skipped during pruning because stat failed.
    pub stat_failures: Vec<String>,
    /// Local entries not uploaded because their name is not valid UTF-8.
    pub skipped_entries: Vec<String>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn new(options: &SyncOptions) -> Self {
        Self {
            local_root: options.local_root.clone(),
            remote_root: options.remote_root.clone(),
            dry_run: options.dry_run,
            ..Default::default()
        }
    }

    pub fn files_transferred(&self) -> u64 {
        self.new_files + self.updated_files
    }

    pub fn entries_removed(&self) -> u64 {
        self.files_removed + self.dirs_removed
    }

    /// True when the call neither transferred nor removed anything.
    pub fn is_noop(&self) -> bool {
        self.files_transferred() == 0 && self.entries_removed() == 0 && self.dirs_created == 0
    }
}

/// Runs synchronization calls for one set of options.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Open one SFTP session on `connection`, synchronize, close it.
    pub fn sync_over_ssh(&self, connection: &SshConnection) -> Result<SyncReport, SyncError> {
        let mut session = SftpSession::open(connection)?;
        self.sync(&mut session)
    }

    /// Synchronize over an already open session. The session is closed
    /// before returning, on success and on error alike.
    pub fn sync<S: RemoteFs + ?Sized>(&self, session: &mut S) -> Result<SyncReport, SyncError> {
        let opts = &self.options;
        let result = if opts.local_root.is_dir() {
            self.run(session)
        } else {
            Err(SyncError::LocalRootMissing(opts.local_root.clone()))
        };

        let closed = session.close();
        tracing::debug!(remote_root = %opts.remote_root, "transfer session closed");

        match (result, closed) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!(error = %close_err, "failed to close transfer session after error");
                Err(e)
            }
        }
    }

    fn run<S: RemoteFs + ?Sized>(&self, session: &mut S) -> Result<SyncReport, SyncError> {
        let opts = &self.options;
        let start = Instant::now();
        let mut report = SyncReport::new(opts);

        tracing::info!(
            local_root = %opts.local_root.display(),
            remote_root = %opts.remote_root,
            excludes = opts.exclusions.len(),
            dry_run = opts.dry_run,
            "syncing"
        );

        prune::prune(session, opts, &mut report)?;
        upload::upload(session, opts, &mut report)?;

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            new = report.new_files,
            updated = report.updated_files,
            unchanged = report.unchanged_files,
            removed = report.entries_removed(),
            bytes = report.bytes_transferred,
            duration_ms = report.duration_ms,
            "sync completed"
        );
        Ok(report)
    }
}
