//! SFTP transport for the mirror, built on `ssh2`.
//!
//! [`SshConnection`] owns an authenticated SSH session. [`SftpSession`] is
//! one SFTP channel opened on it and is what the walkers talk to.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{ErrorCode, FileStat, Session, Sftp};
use thiserror::Error;

use super::remote::{EntryKind, RemoteError, RemoteErrorKind, RemoteFs, RemoteOp, RemoteStat};
use crate::config::HostConfig;

// libssh2 SFTP status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_FAILURE: i32 = 4;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_FILE_ALREADY_EXISTS: i32 = 11;

/// Errors establishing the SSH connection.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Cannot resolve host {0}")]
    Resolve(String),

    #[error("TCP connection to {host} failed: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("SSH handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("Authentication as {user} failed: {message}")]
    Auth { user: String, message: String },
}

/// Authenticated SSH session to one host.
pub struct SshConnection {
    session: Session,
    target: String,
}

impl SshConnection {
    /// Connect and authenticate. Password first, then identity file, then
    /// the SSH agent. Host keys are not verified.
    pub fn connect(host: &HostConfig) -> Result<Self, SshError> {
        let target = format!("{}@{}", host.username, host.hostname);
        let timeout = Duration::from_secs(host.connect_timeout_secs);

        let addr = (host.hostname.as_str(), host.port)
            .to_socket_addrs()
            .map_err(|_| SshError::Resolve(host.hostname.clone()))?
            .next()
            .ok_or_else(|| SshError::Resolve(host.hostname.clone()))?;
        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|source| SshError::Connect {
            host: host.hostname.clone(),
            source,
        })?;

        let handshake_err = |source| SshError::Handshake {
            host: host.hostname.clone(),
            source,
        };
        let mut session = Session::new().map_err(handshake_err)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(timeout));
        session.handshake().map_err(handshake_err)?;

        let auth_err = |e: ssh2::Error| SshError::Auth {
            user: host.username.clone(),
            message: e.message().to_string(),
        };
        if let Some(password) = host.resolved_password() {
            session
                .userauth_password(&host.username, &password)
                .map_err(auth_err)?;
        } else if let Some(identity) = host.identity_path() {
            session
                .userauth_pubkey_file(&host.username, None, &identity, None)
                .map_err(auth_err)?;
        } else {
            session.userauth_agent(&host.username).map_err(auth_err)?;
        }
        if !session.authenticated() {
            return Err(SshError::Auth {
                user: host.username.clone(),
                message: "server rejected credentials".to_string(),
            });
        }

        // Individual transfers have no deadline once connected.
        session.set_timeout(0);
        tracing::info!(host = %target, "SSH connection established");
        Ok(Self { session, target })
    }

    /// `user@host`.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "closing", None);
        tracing::info!(host = %self.target, "SSH connection closed");
    }
}

/// One SFTP channel, reused by every operation of a sync call.
pub struct SftpSession {
    sftp: Option<Sftp>,
    target: String,
}

impl SftpSession {
    pub fn open(connection: &SshConnection) -> Result<Self, RemoteError> {
        let sftp = connection
            .session
            .sftp()
            .map_err(|e| map_err(RemoteOp::Open, connection.target(), e))?;
        tracing::debug!(host = %connection.target(), "SFTP channel opened");
        Ok(Self {
            sftp: Some(sftp),
            target: connection.target.clone(),
        })
    }

    fn channel(&self, op: RemoteOp, path: &str) -> Result<&Sftp, RemoteError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::Other, op, path, "SFTP channel closed"))
    }
}

impl RemoteFs for SftpSession {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, RemoteError> {
        let entries = self
            .channel(RemoteOp::List, dir)?
            .readdir(Path::new(dir))
            .map_err(|e| map_err(RemoteOp::List, dir, e))?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn stat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        let st = self
            .channel(RemoteOp::Stat, path)?
            .stat(Path::new(path))
            .map_err(|e| map_err(RemoteOp::Stat, path, e))?;
        Ok(remote_stat(&st))
    }

    fn lstat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        let st = self
            .channel(RemoteOp::Stat, path)?
            .lstat(Path::new(path))
            .map_err(|e| map_err(RemoteOp::Stat, path, e))?;
        Ok(remote_stat(&st))
    }

    fn mkdir(&mut self, path: &str) -> Result<(), RemoteError> {
        let sftp = self.channel(RemoteOp::Mkdir, path)?;
        match sftp.mkdir(Path::new(path), 0o755) {
            Ok(()) => Ok(()),
            // OpenSSH answers a generic failure for an existing entry.
            Err(e)
                if matches!(e.code(), ErrorCode::SFTP(FX_FAILURE))
                    && sftp.stat(Path::new(path)).is_ok() =>
            {
                Err(RemoteError::new(
                    RemoteErrorKind::AlreadyExists,
                    RemoteOp::Mkdir,
                    path,
                    e.message(),
                ))
            }
            Err(e) => Err(map_err(RemoteOp::Mkdir, path, e)),
        }
    }

    fn put(&mut self, path: &str, contents: &mut dyn Read) -> Result<u64, RemoteError> {
        let mut file = self
            .channel(RemoteOp::Put, path)?
            .create(Path::new(path))
            .map_err(|e| map_err(RemoteOp::Put, path, e))?;
        io::copy(contents, &mut file).map_err(|e| {
            let kind = match e.kind() {
                io::ErrorKind::PermissionDenied => RemoteErrorKind::PermissionDenied,
                _ => RemoteErrorKind::Other,
            };
            RemoteError::new(kind, RemoteOp::Put, path, e.to_string())
        })
    }

    fn remove_file(&mut self, path: &str) -> Result<(), RemoteError> {
        self.channel(RemoteOp::RemoveFile, path)?
            .unlink(Path::new(path))
            .map_err(|e| map_err(RemoteOp::RemoveFile, path, e))
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.channel(RemoteOp::RemoveDir, path)?
            .rmdir(Path::new(path))
            .map_err(|e| map_err(RemoteOp::RemoveDir, path, e))
    }

    fn set_times(&mut self, path: &str, atime: u64, mtime: u64) -> Result<(), RemoteError> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: None,
            atime: Some(atime),
            mtime: Some(mtime),
        };
        self.channel(RemoteOp::SetTimes, path)?
            .setstat(Path::new(path), stat)
            .map_err(|e| map_err(RemoteOp::SetTimes, path, e))
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), RemoteError> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        self.channel(RemoteOp::SetPermissions, path)?
            .setstat(Path::new(path), stat)
            .map_err(|e| map_err(RemoteOp::SetPermissions, path, e))
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        let Some(mut sftp) = self.sftp.take() else {
            return Ok(());
        };
        sftp.shutdown()
            .map_err(|e| map_err(RemoteOp::Close, &self.target, e))?;
        tracing::debug!(host = %self.target, "SFTP channel closed");
        Ok(())
    }
}

/// Symlinks are reported as files so the walkers never descend into them.
fn remote_stat(st: &FileStat) -> RemoteStat {
    let symlink = st.file_type().is_symlink();
    RemoteStat {
        kind: if st.is_dir() && !symlink {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        mtime: st.mtime,
        symlink,
    }
}

/// libssh2 takes the session timeout as `u32` milliseconds; 0 means none.
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn map_err(op: RemoteOp, path: &str, err: ssh2::Error) -> RemoteError {
    RemoteError::new(classify(err.code()), op, path, err.message())
}

fn classify(code: ErrorCode) -> RemoteErrorKind {
    match code {
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH) => RemoteErrorKind::NotFound,
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => RemoteErrorKind::PermissionDenied,
        ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => RemoteErrorKind::AlreadyExists,
        _ => RemoteErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sftp_codes() {
        assert_eq!(classify(ErrorCode::SFTP(2)), RemoteErrorKind::NotFound);
        assert_eq!(classify(ErrorCode::SFTP(10)), RemoteErrorKind::NotFound);
        assert_eq!(classify(ErrorCode::SFTP(3)), RemoteErrorKind::PermissionDenied);
        assert_eq!(classify(ErrorCode::SFTP(11)), RemoteErrorKind::AlreadyExists);
        assert_eq!(classify(ErrorCode::SFTP(4)), RemoteErrorKind::Other);
        assert_eq!(classify(ErrorCode::Session(-7)), RemoteErrorKind::Other);
    }

    #[test]
    fn test_timeout_millis_saturates() {
        assert_eq!(timeout_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(timeout_millis(Duration::from_secs(5_000_000)), u32::MAX);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn test_symlink_stat_is_not_a_directory() {
        let mut st = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(0o120777),
            atime: None,
            mtime: Some(7),
        };
        let link = remote_stat(&st);
        assert!(link.symlink);
        assert_eq!(link.kind, EntryKind::File);

        st.perm = Some(0o040755);
        let dir = remote_stat(&st);
        assert!(!dir.symlink);
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!(dir.mtime, Some(7));
    }

    #[test]
    fn test_ssh_error_display() {
        let err = SshError::Auth {
            user: "pi".into(),
            message: "bad password".into(),
        };
        assert_eq!(err.to_string(), "Authentication as pi failed: bad password");
        assert_eq!(
            SshError::Resolve("nohost".into()).to_string(),
            "Cannot resolve host nohost"
        );
    }
}
