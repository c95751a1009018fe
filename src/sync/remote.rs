//! Remote side of the mirror: the operations one transfer session must offer.
//!
//! Remote paths are plain strings with forward-slash segments, whatever the
//! local platform is. Each call is one blocking round trip.

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a filesystem entry, shared by the local and remote sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// Attributes of a remote entry. Anything that is not a directory is a file;
/// a symlink seen through `lstat` is a file with `symlink` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: EntryKind,
    /// Modification time in whole seconds since the Unix epoch.
    pub mtime: Option<u64>,
    pub symlink: bool,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Remote operation, carried in errors and used for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Open,
    List,
    Stat,
    Mkdir,
    Put,
    RemoveFile,
    RemoveDir,
    SetTimes,
    SetPermissions,
    Close,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::List => "list",
            Self::Stat => "stat",
            Self::Mkdir => "mkdir",
            Self::Put => "put",
            Self::RemoveFile => "remove",
            Self::RemoveDir => "rmdir",
            Self::SetTimes => "utime",
            Self::SetPermissions => "chmod",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Broad classification of a remote failure. The walkers only branch on
/// `NotFound` and `AlreadyExists`; everything else is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Other,
}

/// Failure reported by the remote side, with the server's own message.
#[derive(Error, Debug, Clone)]
#[error("remote {op} failed for {path}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub op: RemoteOp,
    pub path: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(
        kind: RemoteErrorKind,
        op: RemoteOp,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            op,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == RemoteErrorKind::AlreadyExists
    }
}

/// Capability interface of one open transfer session.
///
/// Implemented over SFTP by [`super::sftp::SftpSession`] and in memory by
/// [`super::memory::MemoryRemote`].
pub trait RemoteFs {
    /// Names (not paths) of the direct children of `dir`.
    fn list(&mut self, dir: &str) -> Result<Vec<String>, RemoteError>;

    /// Stat following symlinks.
    fn stat(&mut self, path: &str) -> Result<RemoteStat, RemoteError>;

    /// Stat without following symlinks. Pruning uses this so that a link is
    /// unlinked rather than descended into.
    fn lstat(&mut self, path: &str) -> Result<RemoteStat, RemoteError>;

    /// Create one directory. An existing entry yields `AlreadyExists`.
    fn mkdir(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Write `contents` to `path`, replacing any existing file. Returns the
    /// number of bytes written.
    fn put(&mut self, path: &str, contents: &mut dyn Read) -> Result<u64, RemoteError>;

    fn remove_file(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Remove an empty directory.
    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    fn set_times(&mut self, path: &str, atime: u64, mtime: u64) -> Result<(), RemoteError>;

    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), RemoteError>;

    /// Release the channel. Called exactly once at the end of a sync call.
    fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}

impl<T: RemoteFs + ?Sized> RemoteFs for &mut T {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, RemoteError> {
        (**self).list(dir)
    }

    fn stat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        (**self).stat(path)
    }

    fn lstat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        (**self).lstat(path)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), RemoteError> {
        (**self).mkdir(path)
    }

    fn put(&mut self, path: &str, contents: &mut dyn Read) -> Result<u64, RemoteError> {
        (**self).put(path, contents)
    }

    fn remove_file(&mut self, path: &str) -> Result<(), RemoteError> {
        (**self).remove_file(path)
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        (**self).remove_dir(path)
    }

    fn set_times(&mut self, path: &str, atime: u64, mtime: u64) -> Result<(), RemoteError> {
        (**self).set_times(path, atime, mtime)
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), RemoteError> {
        (**self).set_permissions(path, mode)
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        (**self).close()
    }
}

/// Append one segment to a remote directory path.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Final segment of a remote path, ignoring a trailing slash.
pub fn remote_file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
