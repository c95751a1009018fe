//! Change-detection uploader.
//!
//! Walks the local tree depth-first, creating remote directories on demand
//! and transferring files that are missing remotely or strictly newer
//! locally. Transferred files get the local mtime stamped on the remote
//! copy so the next run sees them as up to date.

use std::fs::{self, File, Metadata};
use std::path::Path;

use super::compare::{TransferDecision, mtime_secs};
use super::engine::{SyncError, SyncOptions, SyncReport};
use super::remote::{RemoteFs, RemoteStat, join_remote};

/// Files with this suffix are made executable after transfer.
pub const EXECUTABLE_SUFFIX: &str = ".sh";

/// Mode applied to executable scripts.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Upload `options.local_root` into `options.remote_root`.
pub fn upload<S: RemoteFs + ?Sized>(
    session: &mut S,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    let mut walker = Uploader {
        session,
        options,
        report,
    };
    walker.upload_dir(&options.local_root, &options.remote_root, false)
}

/// Whether a remote file receives [`EXECUTABLE_MODE`].
pub fn is_executable_script(path: &str) -> bool {
    path.ends_with(EXECUTABLE_SUFFIX)
}

struct Uploader<'a, S: RemoteFs + ?Sized> {
    session: &'a mut S,
    options: &'a SyncOptions,
    report: &'a mut SyncReport,
}

impl<S: RemoteFs + ?Sized> Uploader<'_, S> {
    /// `parent_absent` is only ever true in dry runs, where a directory that
    /// would have been created does not exist and must not be stat'ed into.
    fn upload_dir(
        &mut self,
        local_dir: &Path,
        remote_dir: &str,
        parent_absent: bool,
    ) -> Result<(), SyncError> {
        let absent = self.ensure_remote_dir(remote_dir, parent_absent)?;

        let mut entries = fs::read_dir(local_dir)
            .and_then(|rd| rd.collect::<Result<Vec<_>, _>>())
            .map_err(|e| SyncError::local(local_dir, e))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let local_child = entry.path();
            if self.options.exclusions.excludes_local(&local_child) {
                tracing::debug!(local = %local_child.display(), "excluded");
                self.report.excluded_entries += 1;
                continue;
            }

            // Remote paths are UTF-8; a lossy name would upload under a different name.
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                tracing::warn!(local = %local_child.display(), "file name is not valid UTF-8, skipping");
                self.report.skipped_entries.push(local_child.display().to_string());
                continue;
            };
            let remote_child = join_remote(remote_dir, &name);
            let meta = fs::metadata(&local_child).map_err(|e| SyncError::local(&local_child, e))?;
            if meta.is_dir() {
                self.upload_dir(&local_child, &remote_child, absent)?;
            } else {
                self.upload_file(&local_child, &meta, &remote_child, absent)?;
            }
        }
        Ok(())
    }

    /// Create `remote_dir` unless it exists. Returns true when the directory
    /// is still absent afterwards (dry run only).
    fn ensure_remote_dir(&mut self, remote_dir: &str, parent_absent: bool) -> Result<bool, SyncError> {
        if self.options.dry_run {
            let exists = !parent_absent
                && match self.session.stat(remote_dir) {
                    Ok(stat) => stat.is_dir(),
                    Err(e) if e.is_not_found() => false,
                    Err(e) => return Err(e.into()),
                };
            if !exists {
                tracing::info!(remote = %remote_dir, dry_run = true, "creating remote directory");
                self.report.dirs_created += 1;
            }
            return Ok(!exists);
        }

        match self.session.mkdir(remote_dir) {
            Ok(()) => {
                tracing::info!(remote = %remote_dir, "created remote directory");
                self.report.dirs_created += 1;
            }
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(false)
    }

    fn upload_file(
        &mut self,
        local_file: &Path,
        meta: &Metadata,
        remote_file: &str,
        parent_absent: bool,
    ) -> Result<(), SyncError> {
        let local_mtime = mtime_secs(meta).map_err(|e| SyncError::local(local_file, e))?;
        let remote = if parent_absent {
            None
        } else {
            self.remote_file_stat(remote_file)?
        };

        let decision = TransferDecision::decide(local_mtime, remote.as_ref());
        if !decision.needs_transfer() {
            tracing::debug!(remote = %remote_file, "up to date");
            self.report.unchanged_files += 1;
            return Ok(());
        }
        if decision == TransferDecision::New {
            tracing::info!(remote = %remote_file, dry_run = self.options.dry_run, "uploading new file");
            self.report.new_files += 1;
        } else {
            tracing::info!(remote = %remote_file, dry_run = self.options.dry_run, "updating remote file");
            self.report.updated_files += 1;
        }

        if self.options.dry_run {
            self.report.bytes_transferred += meta.len();
            return Ok(());
        }

        let mut source = File::open(local_file).map_err(|e| SyncError::local(local_file, e))?;
        let written = self.session.put(remote_file, &mut source)?;
        if is_executable_script(remote_file) {
            self.session.set_permissions(remote_file, EXECUTABLE_MODE)?;
        }
        self.session.set_times(remote_file, local_mtime, local_mtime)?;
        self.report.bytes_transferred += written;
        Ok(())
    }

    /// Stat the remote copy; `None` when it does not exist.
    fn remote_file_stat(&mut self, remote_file: &str) -> Result<Option<RemoteStat>, SyncError> {
        match self.session.stat(remote_file) {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::memory::MemoryRemote;
    use crate::sync::remote::{RemoteErrorKind, RemoteOp};
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn write_with_mtime(path: &Path, contents: &str, secs: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    fn run(remote: &mut MemoryRemote, options: &SyncOptions) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(options);
        upload(remote, options, &mut report)?;
        Ok(report)
    }

    #[test]
    fn test_is_executable_script() {
        assert!(is_executable_script("/app/start.sh"));
        assert!(!is_executable_script("/app/start.shell"));
        assert!(!is_executable_script("/app/config.ini"));
    }

    #[test]
    fn test_new_files_stamped_with_local_mtime() {
        let tmp = TempDir::new().unwrap();
        write_with_mtime(&tmp.path().join("run.sh"), "#!/bin/sh", 1_700_000_000);
        write_with_mtime(&tmp.path().join("data/config.ini"), "[a]", 1_700_000_100);
        let mut remote = MemoryRemote::new();
        remote.add_dir("/srv");

        let report = run(&mut remote, &SyncOptions::new(tmp.path(), "/srv/app")).unwrap();
        assert_eq!(report.new_files, 2);
        assert_eq!(report.dirs_created, 2);
        assert_eq!(report.bytes_transferred, 12);

        let script = remote.file("/srv/app/run.sh").unwrap();
        assert_eq!(script.mtime, 1_700_000_000);
        assert_eq!(script.mode, EXECUTABLE_MODE);
        let config = remote.file("/srv/app/data/config.ini").unwrap();
        assert_eq!(config.mtime, 1_700_000_100);
        assert_ne!(config.mode, EXECUTABLE_MODE);
    }

    #[test]
    fn test_only_strictly_newer_files_transfer() {
        let tmp = TempDir::new().unwrap();
        write_with_mtime(&tmp.path().join("same.txt"), "s", 1_700_000_000);
        write_with_mtime(&tmp.path().join("older.txt"), "o", 1_600_000_000);
        write_with_mtime(&tmp.path().join("newer.txt"), "n", 1_700_000_500);
        let mut remote = MemoryRemote::new();
        remote
            .add_file("/app/same.txt", "s", 1_700_000_000)
            .add_file("/app/older.txt", "o", 1_700_000_000)
            .add_file("/app/newer.txt", "old", 1_700_000_000);

        let report = run(&mut remote, &SyncOptions::new(tmp.path(), "/app")).unwrap();
        assert_eq!(report.updated_files, 1);
        assert_eq!(report.unchanged_files, 2);
        assert_eq!(remote.calls(RemoteOp::Put), 1);
        assert_eq!(remote.file("/app/newer.txt").unwrap().contents, b"n");
    }

    #[test]
    fn test_sub_second_difference_does_not_transfer() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        fs::write(&path, "a").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_millis(1_700_000_000_750))
            .unwrap();
        let mut remote = MemoryRemote::new();
        remote.add_file("/app/a.txt", "a", 1_700_000_000);

        let report = run(&mut remote, &SyncOptions::new(tmp.path(), "/app")).unwrap();
        assert_eq!(report.files_transferred(), 0);
    }

    #[test]
    fn test_excluded_local_entries_never_reach_remote() {
        let tmp = TempDir::new().unwrap();
        write_with_mtime(&tmp.path().join(".git/HEAD"), "ref", 1);
        write_with_mtime(&tmp.path().join("main.sh"), "x", 1);
        let mut remote = MemoryRemote::new();
        let options =
            SyncOptions::new(tmp.path(), "/app").with_exclusions([".git"].into_iter().collect());

        let report = run(&mut remote, &options).unwrap();
        assert!(!remote.exists("/app/.git"));
        assert!(remote.exists("/app/main.sh"));
        assert_eq!(report.excluded_entries, 1);
    }

    #[test]
    fn test_top_level_remote_root_created_on_empty_remote() {
        let tmp = TempDir::new().unwrap();
        write_with_mtime(&tmp.path().join("main.sh"), "x", 1);
        let mut remote = MemoryRemote::new();

        let report = run(&mut remote, &SyncOptions::new(tmp.path(), "/app")).unwrap();
        assert!(remote.is_dir("/app"));
        assert_eq!(report.dirs_created, 1);
        assert_eq!(report.new_files, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        let bad = tmp.path().join(OsStr::from_bytes(b"caf\xe9.txt"));
        // Some filesystems refuse non-UTF-8 names outright.
        if fs::write(&bad, "latin-1").is_err() {
            return;
        }
        write_with_mtime(&tmp.path().join("ok.txt"), "ok", 1);
        let mut remote = MemoryRemote::new();

        let report = run(&mut remote, &SyncOptions::new(tmp.path(), "/app")).unwrap();
        assert_eq!(report.new_files, 1);
        assert_eq!(report.skipped_entries.len(), 1);
        assert!(remote.exists("/app/ok.txt"));
        assert!(
            remote
                .paths()
                .iter()
                .all(|p| !p.contains('\u{FFFD}') && !p.starts_with("/app/caf"))
        );
    }

    #[test]
    fn test_stat_failure_other_than_not_found_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write_with_mtime(&tmp.path().join("a.txt"), "a", 1);
        let mut remote = MemoryRemote::new();
        remote
            .add_dir("/app")
            .fail_on(RemoteOp::Stat, "/app/a.txt", RemoteErrorKind::PermissionDenied);

        let err = run(&mut remote, &SyncOptions::new(tmp.path(), "/app")).unwrap_err();
        assert!(matches!(err, SyncError::Remote(ref e) if e.op == RemoteOp::Stat));
    }

    #[test]
    fn test_mkdir_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut remote = MemoryRemote::new();
        let err = run(&mut remote, &SyncOptions::new(tmp.path(), "/missing/parent/app")).unwrap_err();
        assert!(matches!(err, SyncError::Remote(ref e) if e.op == RemoteOp::Mkdir));
    }

    #[test]
    fn test_dry_run_into_absent_tree() {
        let tmp = TempDir::new().unwrap();
        write_with_mtime(&tmp.path().join("sub/a.txt"), "abc", 1);
        let mut remote = MemoryRemote::new();
        let options = SyncOptions::new(tmp.path(), "/app").with_dry_run(true);

        let report = run(&mut remote, &options).unwrap();
        assert_eq!(report.dirs_created, 2);
        assert_eq!(report.new_files, 1);
        assert_eq!(report.bytes_transferred, 3);
        assert_eq!(remote.mutations(), 0);
        // Nothing below the first absent directory is stat'ed.
        assert_eq!(remote.calls(RemoteOp::Stat), 1);
    }
}
