//! Object metadata types
//!
//! These mirror the host's `struct stat` and directory entries closely enough
//! to be passed back to a client unchanged, while staying independent of any
//! particular object variant.

use serde::{Deserialize, Serialize};

/// Coarse type of a filesystem object, as seen by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Regular file, device or socket: anything terminal that can be opened
    File,
    /// Directory: can be traversed and listed
    Dir,
    /// Symbolic link: can be read
    Symlink,
    /// Protocol-internal object with no filesystem meaning
    Other,
}

impl ObjectKind {
    /// Derives the kind from `st_mode` file-type bits
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFDIR => ObjectKind::Dir,
            libc::S_IFLNK => ObjectKind::Symlink,
            _ => ObjectKind::File,
        }
    }

    /// Stable integer used on the wire
    pub fn as_u8(self) -> u8 {
        match self {
            ObjectKind::File => 1,
            ObjectKind::Dir => 2,
            ObjectKind::Symlink => 3,
            ObjectKind::Other => 4,
        }
    }

    /// Inverse of [`ObjectKind::as_u8`]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ObjectKind::File),
            2 => Some(ObjectKind::Dir),
            3 => Some(ObjectKind::Symlink),
            4 => Some(ObjectKind::Other),
            _ => None,
        }
    }
}

/// Seconds and nanoseconds, as in `struct timespec`
///
/// `nsec` may carry `UTIME_NOW` / `UTIME_OMIT` when used as a `utimes` argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Leave this timestamp unchanged
    pub const fn omit() -> Self {
        Self::new(0, libc::UTIME_OMIT as i64)
    }

    /// Set this timestamp to the current time
    pub const fn now() -> Self {
        Self::new(0, libc::UTIME_NOW as i64)
    }

    pub fn to_libc(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.sec as libc::time_t,
            tv_nsec: self.nsec as libc::c_long,
        }
    }
}

/// Object metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatInfo {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl StatInfo {
    /// Number of integer words in the wire encoding
    pub const WORDS: usize = 16;

    /// Converts a host `struct stat`
    pub fn from_libc(st: &libc::stat) -> Self {
        Self {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u64,
            uid: st.st_uid as u32,
            gid: st.st_gid as u32,
            rdev: st.st_rdev as u64,
            size: st.st_size as i64,
            blksize: st.st_blksize as i64,
            blocks: st.st_blocks as i64,
            atime: Timespec::new(st.st_atime as i64, st.st_atime_nsec as i64),
            mtime: Timespec::new(st.st_mtime as i64, st.st_mtime_nsec as i64),
            ctime: Timespec::new(st.st_ctime as i64, st.st_ctime_nsec as i64),
        }
    }

    /// Synthesizes metadata for an object with no backing inode
    pub fn fabricated(dev: u64, ino: u64, mode: u32) -> Self {
        // SAFETY: getuid/getgid cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            dev,
            ino,
            mode,
            nlink: if mode & libc::S_IFMT == libc::S_IFDIR { 2 } else { 1 },
            uid: uid as u32,
            gid: gid as u32,
            blksize: 1024,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_mode(self.mode)
    }

    /// Flattens into the fixed-width word sequence used on the wire
    pub fn to_words(&self) -> [i64; Self::WORDS] {
        [
            self.dev as i64,
            self.ino as i64,
            self.mode as i64,
            self.nlink as i64,
            self.uid as i64,
            self.gid as i64,
            self.rdev as i64,
            self.size,
            self.blksize,
            self.blocks,
            self.atime.sec,
            self.atime.nsec,
            self.mtime.sec,
            self.mtime.nsec,
            self.ctime.sec,
            self.ctime.nsec,
        ]
    }

    /// Inverse of [`StatInfo::to_words`]
    pub fn from_words(w: &[i64; Self::WORDS]) -> Self {
        Self {
            dev: w[0] as u64,
            ino: w[1] as u64,
            mode: w[2] as u32,
            nlink: w[3] as u64,
            uid: w[4] as u32,
            gid: w[5] as u32,
            rdev: w[6] as u64,
            size: w[7],
            blksize: w[8],
            blocks: w[9],
            atime: Timespec::new(w[10], w[11]),
            mtime: Timespec::new(w[12], w[13]),
            ctime: Timespec::new(w[14], w[15]),
        }
    }
}

/// A single directory listing entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirEntry {
    /// Raw entry name (no interpretation as UTF-8)
    pub name: Vec<u8>,
    pub ino: u64,
    /// `d_type` value, `DT_UNKNOWN` when not known
    pub d_type: u8,
}

impl DirEntry {
    pub fn new(name: impl Into<Vec<u8>>, ino: u64, d_type: u8) -> Self {
        Self {
            name: name.into(),
            ino,
            d_type,
        }
    }
}
