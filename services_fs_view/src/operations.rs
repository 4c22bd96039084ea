//! Filesystem operations
//!
//! The path-based operations a client process performs. The server
//! implements them against its namespace; the client stub implements them
//! by sending requests to a server capability.

use core_types::{DirEntry, Errno, StatInfo, Timespec};
use fs_view::{Cap, GrantFlags};
use std::fmt;
use std::os::fd::OwnedFd;

/// What `exec` hands back: the program to run and how to run it
pub struct ExecTarget {
    /// Open descriptor of the program (or of its interpreter)
    pub fd: OwnedFd,
    /// Argument vector, rewritten when a `#!` interpreter was substituted
    pub argv: Vec<Vec<u8>>,
    /// Root directory for the new program
    pub root: Cap,
    /// Working directory for the new program, if one is set
    pub cwd: Option<Vec<u8>>,
}

impl fmt::Debug for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecTarget")
            .field("fd", &self.fd)
            .field(
                "argv",
                &self
                    .argv
                    .iter()
                    .map(|a| String::from_utf8_lossy(a))
                    .collect::<Vec<_>>(),
            )
            .field("cwd", &self.cwd.as_ref().map(|c| String::from_utf8_lossy(c)))
            .finish()
    }
}

/// Filesystem operations trait
///
/// Relative paths are resolved against the working directory; without one
/// they fail with `ENOENT`.
pub trait FsOperations {
    /// Opens (and with `O_CREAT` possibly creates) a file
    fn open(&self, path: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno>;

    fn stat(&self, path: &[u8]) -> Result<StatInfo, Errno>;

    /// Like [`FsOperations::stat`], but a final symlink is not followed
    fn lstat(&self, path: &[u8]) -> Result<StatInfo, Errno>;

    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>, Errno>;

    fn mkdir(&self, path: &[u8], mode: u32) -> Result<(), Errno>;

    /// Creates `path` as a symlink pointing at `target`
    fn symlink(&self, target: &[u8], path: &[u8]) -> Result<(), Errno>;

    fn rename(&self, from: &[u8], to: &[u8]) -> Result<(), Errno>;

    fn link(&self, from: &[u8], to: &[u8]) -> Result<(), Errno>;

    fn unlink(&self, path: &[u8]) -> Result<(), Errno>;

    fn rmdir(&self, path: &[u8]) -> Result<(), Errno>;

    fn chmod(&self, path: &[u8], mode: u32) -> Result<(), Errno>;

    fn utimes(
        &self,
        path: &[u8],
        atime: Timespec,
        mtime: Timespec,
        follow: bool,
    ) -> Result<(), Errno>;

    fn chdir(&self, path: &[u8]) -> Result<(), Errno>;

    fn getcwd(&self) -> Result<Vec<u8>, Errno>;

    fn dir_list(&self, path: &[u8]) -> Result<Vec<DirEntry>, Errno>;

    /// Checks `R_OK`/`W_OK`/`X_OK` against the owner permission bits
    fn access(&self, path: &[u8], mode: i32) -> Result<(), Errno>;

    /// Connects `sock` to the socket at `path`
    fn connect(&self, path: &[u8], sock: OwnedFd) -> Result<(), Errno>;

    /// Binds `sock` to a new socket at `path`
    fn bind(&self, path: &[u8], sock: OwnedFd) -> Result<(), Errno>;

    /// Prepares to run the program at `path`
    fn exec(&self, path: &[u8], argv: Vec<Vec<u8>>) -> Result<ExecTarget, Errno>;

    /// A new server over the same namespace with its own working directory
    fn fork(&self) -> Result<Cap, Errno>;

    fn get_root(&self) -> Result<Cap, Errno>;

    /// The directory capability at `path`
    fn get_dir(&self, path: &[u8]) -> Result<Cap, Errno>;

    fn resolve_obj(&self, path: &[u8], follow: bool) -> Result<Cap, Errno>;

    /// Resolves a directory, also returning its path with symlinks expanded
    fn resolve_dir(&self, path: &[u8]) -> Result<(Cap, Vec<u8>), Errno>;

    /// Resolves `path` and attaches the result into the namespace node `node`
    fn resolve_populate(&self, node: Cap, path: &[u8], flags: GrantFlags) -> Result<(), Errno>;

    /// A capability through which the client can write log lines
    fn log_stream(&self) -> Result<Cap, Errno>;

    /// Turns per-request logging on or off, for this server and its forks
    fn set_logging(&self, enabled: bool) -> Result<(), Errno>;
}
