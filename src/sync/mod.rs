//! One-way mirror of a local project tree onto a remote host.
//!
//! A synchronization call makes the remote tree match the local one, modulo
//! exclusions. It runs over one transfer session and proceeds in two strictly
//! ordered, depth-first passes:
//!
//! 1. **prune**: walk the remote tree and remove entries with no local
//!    counterpart of the same kind
//! 2. **upload**: walk the local tree, create missing directories and push
//!    files that are new or strictly newer (whole seconds)
//!
//! # Architecture
//!
//! - **exclude**: string patterns matched against both sides
//! - **compare**: comparison outcomes and the transfer decision
//! - **remote**: the [`RemoteFs`] capability trait every session implements
//! - **sftp**: `ssh2`-backed session and connection
//! - **memory**: in-memory session used by tests
//! - **prune** / **upload**: the two walkers
//! - **engine**: options, report, errors and session lifecycle
//!
//! # Usage
//!
//! ```rust,ignore
//! use rpi_deploy_sync::sync::{MemoryRemote, SyncEngine, SyncOptions};
//!
//! let mut remote = MemoryRemote::new();
//! let report = SyncEngine::new(SyncOptions::new("./app", "/app")).sync(&mut remote)?;
//! assert!(remote.is_dir("/app"));
//! assert!(report.dirs_created >= 1);
//! ```

pub mod compare;
pub mod engine;
pub mod exclude;
pub mod memory;
pub mod prune;
pub mod remote;
pub mod sftp;
pub mod upload;

pub use compare::{EntryComparison, TransferDecision};
pub use engine::{PruneStatPolicy, SyncEngine, SyncError, SyncOptions, SyncReport};
pub use exclude::{DEFAULT_EXCLUDES, ExclusionSet, is_excluded};
pub use memory::MemoryRemote;
pub use remote::{EntryKind, RemoteError, RemoteErrorKind, RemoteFs, RemoteOp, RemoteStat};
pub use sftp::{SftpSession, SshConnection, SshError};
