//! Remote directory mirror walker.
//!
//! Walks the remote tree depth-first and removes every non-excluded entry
//! that has no local counterpart of the same kind. Runs before the uploader.

use std::path::Path;

use super::compare::{EntryComparison, local_kind};
use super::engine::{PruneStatPolicy, SyncError, SyncOptions, SyncReport};
use super::remote::{EntryKind, RemoteError, RemoteFs, join_remote};

/// Prune `options.remote_root` against `options.local_root`.
pub fn prune<S: RemoteFs + ?Sized>(
    session: &mut S,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    let mut walker = Pruner {
        session,
        options,
        report,
    };
    walker.prune_dir(&options.local_root, &options.remote_root)
}

struct Pruner<'a, S: RemoteFs + ?Sized> {
    session: &'a mut S,
    options: &'a SyncOptions,
    report: &'a mut SyncReport,
}

impl<S: RemoteFs + ?Sized> Pruner<'_, S> {
    fn prune_dir(&mut self, local_dir: &Path, remote_dir: &str) -> Result<(), SyncError> {
        let mut names = match self.session.list(remote_dir) {
            Ok(names) => names,
            Err(e) if e.is_not_found() => {
                tracing::debug!(remote = %remote_dir, "remote directory absent, nothing to prune");
                return Ok(());
            }
            Err(e) if self.options.prune_stat_policy == PruneStatPolicy::Strict => {
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!(remote = %remote_dir, error = %e, "cannot list remote directory, skipping prune");
                return Ok(());
            }
        };
        names.sort();

        for name in names {
            let remote_child = join_remote(remote_dir, &name);
            if self.options.exclusions.excludes_remote(&remote_child) {
                tracing::debug!(remote = %remote_child, "excluded");
                self.report.excluded_entries += 1;
                continue;
            }

            let stat = match self.session.lstat(&remote_child) {
                Ok(stat) => stat,
                Err(e) => match self.options.prune_stat_policy {
                    PruneStatPolicy::Strict => {
                        return Err(SyncError::PruneStat {
                            path: remote_child,
                            source: e,
                        });
                    }
                    PruneStatPolicy::Lenient => {
                        tracing::warn!(remote = %remote_child, error = %e, "stat failed, leaving entry in place");
                        self.report.stat_failures.push(remote_child);
                        continue;
                    }
                },
            };

            let local_child = local_dir.join(&name);
            let local = local_kind(&local_child).map_err(|e| SyncError::local(&local_child, e))?;

            match EntryComparison::classify(local, Some(stat.kind)) {
                Some(EntryComparison::SameKind(EntryKind::Directory)) => {
                    self.prune_dir(&local_child, &remote_child)?;
                }
                Some(cmp) if cmp.remote_is_stale() => {
                    tracing::debug!(remote = %remote_child, kind = %stat.kind, symlink = stat.symlink, "stale remote entry");
                    match stat.kind {
                        EntryKind::Directory => self.remove_tree(&remote_child)?,
                        EntryKind::File => self.remove_file(&remote_child)?,
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<(), SyncError> {
        tracing::info!(remote = %path, dry_run = self.options.dry_run, "removing remote file");
        if !self.options.dry_run {
            tolerate_not_found(self.session.remove_file(path))?;
        }
        self.report.files_removed += 1;
        Ok(())
    }

    /// Remove a remote directory and its whole subtree, children first.
    /// Entries that vanish underneath us count as already removed. Symlinks
    /// are unlinked, never followed.
    fn remove_tree(&mut self, dir: &str) -> Result<(), SyncError> {
        let mut names = match self.session.list(dir) {
            Ok(names) => names,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        names.sort();

        for name in names {
            let child = join_remote(dir, &name);
            let stat = match self.session.lstat(&child) {
                Ok(stat) => stat,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            if stat.is_dir() {
                self.remove_tree(&child)?;
            } else {
                self.remove_file(&child)?;
            }
        }

        tracing::info!(remote = %dir, dry_run = self.options.dry_run, "removing remote directory");
        if !self.options.dry_run {
            tolerate_not_found(self.session.remove_dir(dir))?;
        }
        self.report.dirs_removed += 1;
        Ok(())
    }
}

fn tolerate_not_found(result: Result<(), RemoteError>) -> Result<(), RemoteError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
