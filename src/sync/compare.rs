//! Comparison outcomes between a local entry and its remote counterpart.
//!
//! Both walkers reduce every entry to one of these outcomes before acting,
//! which keeps the branching testable without a remote session.

use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::remote::{EntryKind, RemoteStat};

/// How a local entry relates to the remote entry at the same relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryComparison {
    /// Present on both sides with the same kind.
    SameKind(EntryKind),
    /// Present locally only.
    LocalOnly(EntryKind),
    /// Present remotely only.
    RemoteOnly(EntryKind),
    /// Present on both sides with different kinds.
    KindMismatch { local: EntryKind, remote: EntryKind },
}

impl EntryComparison {
    /// Classify a pair of optional kinds. `None` when neither side has the entry.
    pub fn classify(local: Option<EntryKind>, remote: Option<EntryKind>) -> Option<Self> {
        match (local, remote) {
            (Some(l), Some(r)) if l == r => Some(Self::SameKind(l)),
            (Some(local), Some(remote)) => Some(Self::KindMismatch { local, remote }),
            (Some(l), None) => Some(Self::LocalOnly(l)),
            (None, Some(r)) => Some(Self::RemoteOnly(r)),
            (None, None) => None,
        }
    }

    /// Whether pruning must remove the remote entry.
    pub fn remote_is_stale(&self) -> bool {
        matches!(self, Self::RemoteOnly(_) | Self::KindMismatch { .. })
    }
}

/// What the uploader does with one local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDecision {
    /// No remote file exists yet.
    New,
    /// Local copy is strictly newer than the remote one.
    Updated,
    UpToDate,
}

impl TransferDecision {
    /// Compare whole-second timestamps. A remote entry without an mtime is
    /// treated as infinitely old.
    pub fn decide(local_mtime: u64, remote: Option<&RemoteStat>) -> Self {
        match remote {
            None => Self::New,
            Some(stat) if local_mtime > stat.mtime.unwrap_or(0) => Self::Updated,
            Some(_) => Self::UpToDate,
        }
    }

    pub fn needs_transfer(self) -> bool {
        !matches!(self, Self::UpToDate)
    }
}

/// Kind of a local path, following symlinks. `None` if nothing is there.
pub fn local_kind(path: &Path) -> io::Result<Option<EntryKind>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Directory)),
        Ok(_) => Ok(Some(EntryKind::File)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Modification time truncated to whole seconds. Pre-epoch times clamp to 0.
pub fn mtime_secs(meta: &Metadata) -> io::Result<u64> {
    let modified = meta.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0))
}
