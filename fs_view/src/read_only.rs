//! Read-only proxy
//!
//! Wraps any object and refuses every operation that could modify it.
//! Objects reached through the proxy (by `traverse`) are wrapped in turn, so
//! the restriction covers the whole subtree.

use crate::object::{refuse_write_flags, Cap, FsObj};
use core_types::{refuse, DirEntry, Errno, ObjectKind, StatInfo, Timespec};
use std::os::fd::OwnedFd;
use std::rc::Rc;

const WRITE_BITS: u32 = 0o222;

pub struct ReadOnlyProxy {
    inner: Cap,
}

impl ReadOnlyProxy {
    pub fn new(inner: Cap) -> Self {
        Self { inner }
    }

    /// Wraps `obj`, unless it is already a read-only proxy
    pub fn wrap(obj: Cap) -> Cap {
        if obj.as_any().is::<ReadOnlyProxy>() {
            obj
        } else {
            Rc::new(Self::new(obj))
        }
    }

    pub fn inner(&self) -> &Cap {
        &self.inner
    }
}

impl FsObj for ReadOnlyProxy {
    fn type_name(&self) -> &'static str {
        "read_only"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        self.inner.obj_type()
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        let mut stat = self.inner.stat()?;
        stat.mode &= !WRITE_BITS;
        Ok(stat)
    }

    fn utimes(&self, _atime: Timespec, _mtime: Timespec) -> Result<(), Errno> {
        refuse()
    }

    fn chmod(&self, _mode: u32) -> Result<(), Errno> {
        refuse()
    }

    fn open(&self, flags: i32) -> Result<OwnedFd, Errno> {
        refuse_write_flags(flags)?;
        self.inner.open(flags)
    }

    fn socket_connect(&self, _sock: OwnedFd) -> Result<(), Errno> {
        refuse()
    }

    fn traverse(&self, name: &[u8]) -> Result<Cap, Errno> {
        self.inner.traverse(name).map(Self::wrap)
    }

    fn list(&self) -> Result<Vec<DirEntry>, Errno> {
        self.inner.list()
    }

    fn create_file(&self, _name: &[u8], _flags: i32, _mode: u32) -> Result<OwnedFd, Errno> {
        refuse()
    }

    fn mkdir(&self, _name: &[u8], _mode: u32) -> Result<(), Errno> {
        refuse()
    }

    fn symlink(&self, _name: &[u8], _target: &[u8]) -> Result<(), Errno> {
        refuse()
    }

    fn rename(&self, _name: &[u8], _dest_dir: &Cap, _dest_name: &[u8]) -> Result<(), Errno> {
        refuse()
    }

    fn link(&self, _name: &[u8], _dest_dir: &Cap, _dest_name: &[u8]) -> Result<(), Errno> {
        refuse()
    }

    fn unlink(&self, _name: &[u8]) -> Result<(), Errno> {
        refuse()
    }

    fn rmdir(&self, _name: &[u8]) -> Result<(), Errno> {
        refuse()
    }

    fn socket_bind(&self, _name: &[u8], _sock: OwnedFd) -> Result<(), Errno> {
        refuse()
    }

    fn write_target(&self, _name: &[u8]) -> Result<Option<(Cap, Vec<u8>)>, Errno> {
        refuse()
    }

    fn readlink(&self) -> Result<Vec<u8>, Errno> {
        self.inner.readlink()
    }
}
