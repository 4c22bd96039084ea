//! POSIX error taxonomy
//!
//! Every object operation and every FS-operation reply carries one of these
//! codes. They travel over the wire as plain integers.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// A POSIX-style error code
///
/// The named variants cover the codes the runtime itself produces. Codes
/// surfaced by the host kernel that have no named variant are preserved in
/// [`Errno::Other`] so they round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum Errno {
    /// Missing component or name
    #[error("No such file or directory")]
    NoEnt,
    /// Operation refused by a read-only variant
    #[error("Permission denied")]
    Access,
    /// Operation refused by the read-layer immutability rule
    #[error("Operation not permitted")]
    Perm,
    /// Exclusive-creation conflict
    #[error("File exists")]
    Exist,
    /// Non-directory met where a directory was required
    #[error("Not a directory")]
    NotDir,
    /// Directory met where a non-directory was required
    #[error("Is a directory")]
    IsDir,
    /// Symlink expansion budget exhausted
    #[error("Too many levels of symbolic links")]
    Loop,
    /// Cross-namespace rename or link
    #[error("Invalid cross-device link")]
    XDev,
    /// Malformed protocol payload or broken internal invariant
    #[error("Input/output error")]
    Io,
    /// Operation meaningless for this object variant
    #[error("Function not implemented")]
    NoSys,
    /// Bad file descriptor
    #[error("Bad file descriptor")]
    BadF,
    /// Descriptor is not a socket
    #[error("Socket operation on non-socket")]
    NotSock,
    /// Invalid argument
    #[error("Invalid argument")]
    Inval,
    /// Directory not empty
    #[error("Directory not empty")]
    NotEmpty,
    /// Name too long
    #[error("File name too long")]
    NameTooLong,
    /// Resource busy
    #[error("Device or resource busy")]
    Busy,
    /// Socket address already bound
    #[error("Address already in use")]
    AddrInUse,
    /// Executable format error
    #[error("Exec format error")]
    NoExec,
    /// A pending call was abandoned before a reply arrived
    #[error("Operation canceled")]
    Canceled,
    /// Any other host error code
    #[error("errno {0}")]
    Other(i32),
}

impl Errno {
    /// Returns the raw host error code
    pub fn code(self) -> i32 {
        match self {
            Errno::NoEnt => libc::ENOENT,
            Errno::Access => libc::EACCES,
            Errno::Perm => libc::EPERM,
            Errno::Exist => libc::EEXIST,
            Errno::NotDir => libc::ENOTDIR,
            Errno::IsDir => libc::EISDIR,
            Errno::Loop => libc::ELOOP,
            Errno::XDev => libc::EXDEV,
            Errno::Io => libc::EIO,
            Errno::NoSys => libc::ENOSYS,
            Errno::BadF => libc::EBADF,
            Errno::NotSock => libc::ENOTSOCK,
            Errno::Inval => libc::EINVAL,
            Errno::NotEmpty => libc::ENOTEMPTY,
            Errno::NameTooLong => libc::ENAMETOOLONG,
            Errno::Busy => libc::EBUSY,
            Errno::AddrInUse => libc::EADDRINUSE,
            Errno::NoExec => libc::ENOEXEC,
            Errno::Canceled => libc::ECANCELED,
            Errno::Other(code) => code,
        }
    }

    /// Maps a raw host error code onto the taxonomy
    pub fn from_code(code: i32) -> Self {
        match code {
            libc::ENOENT => Errno::NoEnt,
            libc::EACCES => Errno::Access,
            libc::EPERM => Errno::Perm,
            libc::EEXIST => Errno::Exist,
            libc::ENOTDIR => Errno::NotDir,
            libc::EISDIR => Errno::IsDir,
            libc::ELOOP => Errno::Loop,
            libc::EXDEV => Errno::XDev,
            libc::EIO => Errno::Io,
            libc::ENOSYS => Errno::NoSys,
            libc::EBADF => Errno::BadF,
            libc::ENOTSOCK => Errno::NotSock,
            libc::EINVAL => Errno::Inval,
            libc::ENOTEMPTY => Errno::NotEmpty,
            libc::ENAMETOOLONG => Errno::NameTooLong,
            libc::EBUSY => Errno::Busy,
            libc::EADDRINUSE => Errno::AddrInUse,
            libc::ENOEXEC => Errno::NoExec,
            libc::ECANCELED => Errno::Canceled,
            other => Errno::Other(other),
        }
    }

    /// Reads the calling thread's `errno` after a failed libc call
    pub fn last() -> Self {
        Self::from(io::Error::last_os_error())
    }
}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Errno::from_code(code),
            None => Errno::Io,
        }
    }
}

impl From<Errno> for io::Error {
    fn from(errno: Errno) -> Self {
        io::Error::from_raw_os_error(errno.code())
    }
}

/// Unconditional refusal, used by read-only variants for mutating operations
pub fn refuse<T>() -> Result<T, Errno> {
    Err(Errno::Access)
}

/// Operation outside the variant's type (e.g. `mkdir` on a file)
pub fn dummy<T>() -> Result<T, Errno> {
    Err(Errno::NoSys)
}
