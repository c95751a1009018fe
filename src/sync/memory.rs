//! In-memory remote tree implementing [`RemoteFs`].
//!
//! Behaves like a POSIX SFTP server for the operations the mirror uses:
//! `mkdir` needs an existing parent, `rmdir` needs an empty directory, and
//! a fresh `put` stamps the file with the current time. Symlinks are
//! followed by `stat`, `list`, `put` and the attribute setters, but not by
//! `lstat` or `remove_file`. Faults can be injected per operation and path
//! to exercise error handling; `lstat` shares the `Stat` faults, and a close
//! fault is keyed on `/`.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use super::remote::{EntryKind, RemoteError, RemoteErrorKind, RemoteFs, RemoteOp, RemoteStat};

/// A file stored in a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    pub contents: Vec<u8>,
    pub mtime: u64,
    pub atime: u64,
    pub mode: u32,
}

#[derive(Debug, Clone)]
enum Node {
    Dir { mtime: u64 },
    File(MemoryFile),
    Symlink { target: String, mtime: u64 },
}

const DEFAULT_FILE_MODE: u32 = 0o644;
const MAX_LINK_HOPS: usize = 8;

/// In-memory remote filesystem. Starts with an empty root directory.
#[derive(Debug)]
pub struct MemoryRemote {
    nodes: BTreeMap<String, Node>,
    faults: Vec<(RemoteOp, String, RemoteErrorKind)>,
    calls: HashMap<RemoteOp, usize>,
    closed: usize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { mtime: now_secs() });
        Self {
            nodes,
            faults: Vec::new(),
            calls: HashMap::new(),
            closed: 0,
        }
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory and any missing ancestors.
    pub fn add_dir(&mut self, path: &str) -> &mut Self {
        let path = normalize(path);
        for ancestor in ancestors(&path) {
            self.nodes
                .entry(ancestor)
                .or_insert(Node::Dir { mtime: now_secs() });
        }
        self.nodes
            .entry(path)
            .or_insert(Node::Dir { mtime: now_secs() });
        self
    }

    /// Create a file (and missing ancestor directories) with the given mtime.
    pub fn add_file(&mut self, path: &str, contents: impl Into<Vec<u8>>, mtime: u64) -> &mut Self {
        let path = normalize(path);
        for ancestor in ancestors(&path) {
            self.nodes
                .entry(ancestor)
                .or_insert(Node::Dir { mtime: now_secs() });
        }
        self.nodes.insert(
            path,
            Node::File(MemoryFile {
                contents: contents.into(),
                mtime,
                atime: mtime,
                mode: DEFAULT_FILE_MODE,
            }),
        );
        self
    }

    /// Create a symlink at `path` pointing to `target` (and missing ancestor
    /// directories). The target does not have to exist.
    pub fn add_symlink(&mut self, path: &str, target: &str) -> &mut Self {
        let path = normalize(path);
        for ancestor in ancestors(&path) {
            self.nodes
                .entry(ancestor)
                .or_insert(Node::Dir { mtime: now_secs() });
        }
        self.nodes.insert(
            path,
            Node::Symlink {
                target: normalize(target),
                mtime: now_secs(),
            },
        );
        self
    }

    /// Make every `op` on `path` fail with `kind`.
    pub fn fail_on(&mut self, op: RemoteOp, path: &str, kind: RemoteErrorKind) -> &mut Self {
        self.faults.push((op, normalize(path), kind));
        self
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&normalize(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.get(&normalize(path)), Some(Node::Dir { .. }))
    }

    pub fn is_symlink(&self, path: &str) -> bool {
        matches!(self.nodes.get(&normalize(path)), Some(Node::Symlink { .. }))
    }

    pub fn file(&self, path: &str) -> Option<&MemoryFile> {
        match self.nodes.get(&normalize(path)) {
            Some(Node::File(file)) => Some(file),
            _ => None,
        }
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Number of times `op` was invoked, including failed attempts.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of mutating calls (mkdir, put, remove, rmdir, utime, chmod).
    pub fn mutations(&self) -> usize {
        [
            RemoteOp::Mkdir,
            RemoteOp::Put,
            RemoteOp::RemoveFile,
            RemoteOp::RemoveDir,
            RemoteOp::SetTimes,
            RemoteOp::SetPermissions,
        ]
        .iter()
        .map(|op| self.calls(*op))
        .sum()
    }

    pub fn reset_calls(&mut self) {
        self.calls.clear();
    }

    /// How many times the session was closed.
    pub fn close_count(&self) -> usize {
        self.closed
    }

    fn begin(&mut self, op: RemoteOp, path: &str) -> Result<String, RemoteError> {
        *self.calls.entry(op).or_default() += 1;
        let path = normalize(path);
        if let Some((_, _, kind)) = self
            .faults
            .iter()
            .find(|(fop, fpath, _)| *fop == op && *fpath == path)
        {
            return Err(RemoteError::new(*kind, op, path, "injected failure"));
        }
        Ok(path)
    }

    /// Follow symlinks from `path`; the result may not exist.
    fn follow(&self, path: &str) -> String {
        let mut current = path.to_string();
        for _ in 0..MAX_LINK_HOPS {
            match self.nodes.get(&current) {
                Some(Node::Symlink { target, .. }) => current = target.clone(),
                _ => break,
            }
        }
        current
    }

    fn resolve(&self, path: &str) -> Option<(String, &Node)> {
        let resolved = self.follow(path);
        match self.nodes.get(&resolved) {
            Some(Node::Symlink { .. }) | None => None,
            Some(node) => Some((resolved, node)),
        }
    }

    fn parent_is_dir(&self, path: &str) -> bool {
        match parent(path) {
            None => true,
            Some(p) => matches!(self.resolve(p), Some((_, Node::Dir { .. }))),
        }
    }
}

impl RemoteFs for MemoryRemote {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, RemoteError> {
        let dir = self.begin(RemoteOp::List, dir)?;
        let resolved = match self.resolve(&dir) {
            Some((resolved, Node::Dir { .. })) => resolved,
            Some(_) => {
                return Err(RemoteError::new(
                    RemoteErrorKind::Other,
                    RemoteOp::List,
                    dir,
                    "not a directory",
                ));
            }
            None => return Err(not_found(RemoteOp::List, dir)),
        };
        Ok(self
            .nodes
            .keys()
            .filter(|p| parent(p) == Some(resolved.as_str()))
            .map(|p| super::remote::remote_file_name(p).to_string())
            .collect())
    }

    fn stat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        let path = self.begin(RemoteOp::Stat, path)?;
        match self.resolve(&path) {
            Some((_, node)) => Ok(node_stat(node)),
            None => Err(not_found(RemoteOp::Stat, path)),
        }
    }

    fn lstat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        let path = self.begin(RemoteOp::Stat, path)?;
        match self.nodes.get(&path) {
            Some(node) => Ok(node_stat(node)),
            None => Err(not_found(RemoteOp::Stat, path)),
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<(), RemoteError> {
        let path = self.begin(RemoteOp::Mkdir, path)?;
        if self.nodes.contains_key(&path) {
            return Err(RemoteError::new(
                RemoteErrorKind::AlreadyExists,
                RemoteOp::Mkdir,
                path,
                "file exists",
            ));
        }
        if !self.parent_is_dir(&path) {
            return Err(not_found(RemoteOp::Mkdir, path));
        }
        self.nodes.insert(path, Node::Dir { mtime: now_secs() });
        Ok(())
    }

    fn put(&mut self, path: &str, contents: &mut dyn Read) -> Result<u64, RemoteError> {
        let path = self.begin(RemoteOp::Put, path)?;
        let path = self.follow(&path);
        if !self.parent_is_dir(&path) {
            return Err(not_found(RemoteOp::Put, path));
        }
        if let Some(Node::Dir { .. }) = self.nodes.get(&path) {
            return Err(RemoteError::new(
                RemoteErrorKind::Other,
                RemoteOp::Put,
                path,
                "is a directory",
            ));
        }
        let mut buf = Vec::new();
        contents.read_to_end(&mut buf).map_err(|e| {
            RemoteError::new(RemoteErrorKind::Other, RemoteOp::Put, path.clone(), e.to_string())
        })?;
        let written = buf.len() as u64;
        let mode = self.file(&path).map_or(DEFAULT_FILE_MODE, |f| f.mode);
        let stamp = now_secs();
        self.nodes.insert(
            path,
            Node::File(MemoryFile {
                contents: buf,
                mtime: stamp,
                atime: stamp,
                mode,
            }),
        );
        Ok(written)
    }

    fn remove_file(&mut self, path: &str) -> Result<(), RemoteError> {
        let path = self.begin(RemoteOp::RemoveFile, path)?;
        match self.nodes.get(&path) {
            Some(Node::File(_) | Node::Symlink { .. }) => {
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(RemoteError::new(
                RemoteErrorKind::Other,
                RemoteOp::RemoveFile,
                path,
                "is a directory",
            )),
            None => Err(not_found(RemoteOp::RemoveFile, path)),
        }
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        let path = self.begin(RemoteOp::RemoveDir, path)?;
        match self.nodes.get(&path) {
            Some(Node::Dir { .. }) => {
                if self.nodes.keys().any(|p| parent(p) == Some(path.as_str())) {
                    return Err(RemoteError::new(
                        RemoteErrorKind::Other,
                        RemoteOp::RemoveDir,
                        path,
                        "directory not empty",
                    ));
                }
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::File(_) | Node::Symlink { .. }) => Err(RemoteError::new(
                RemoteErrorKind::Other,
                RemoteOp::RemoveDir,
                path,
                "not a directory",
            )),
            None => Err(not_found(RemoteOp::RemoveDir, path)),
        }
    }

    fn set_times(&mut self, path: &str, atime: u64, mtime: u64) -> Result<(), RemoteError> {
        let path = self.begin(RemoteOp::SetTimes, path)?;
        let target = self.follow(&path);
        match self.nodes.get_mut(&target) {
            Some(Node::File(file)) => {
                file.atime = atime;
                file.mtime = mtime;
                Ok(())
            }
            Some(Node::Dir { mtime: dir_mtime }) => {
                *dir_mtime = mtime;
                Ok(())
            }
            Some(Node::Symlink { .. }) | None => Err(not_found(RemoteOp::SetTimes, path)),
        }
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), RemoteError> {
        let path = self.begin(RemoteOp::SetPermissions, path)?;
        let target = self.follow(&path);
        match self.nodes.get_mut(&target) {
            Some(Node::File(file)) => {
                file.mode = mode;
                Ok(())
            }
            Some(Node::Dir { .. }) => Ok(()),
            Some(Node::Symlink { .. }) | None => Err(not_found(RemoteOp::SetPermissions, path)),
        }
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        self.closed += 1;
        self.begin(RemoteOp::Close, "/")?;
        Ok(())
    }
}

fn node_stat(node: &Node) -> RemoteStat {
    match node {
        Node::Dir { mtime } => RemoteStat {
            kind: EntryKind::Directory,
            mtime: Some(*mtime),
            symlink: false,
        },
        Node::File(file) => RemoteStat {
            kind: EntryKind::File,
            mtime: Some(file.mtime),
            symlink: false,
        },
        Node::Symlink { mtime, .. } => RemoteStat {
            kind: EntryKind::File,
            mtime: Some(*mtime),
            symlink: true,
        },
    }
}

fn not_found(op: RemoteOp, path: String) -> RemoteError {
    RemoteError::new(RemoteErrorKind::NotFound, op, path, "no such file")
}

fn normalize(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) => None,
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        out.push(p.to_string());
        current = parent(p);
    }
    out.reverse();
    out
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
