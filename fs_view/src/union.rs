//! Union directory
//!
//! Presents the merged contents of two directories. The first child has
//! priority: its entries shadow the second child's, and every write goes to
//! it. Subdirectories present on both sides are merged recursively, with a
//! new union built at each lookup.

use crate::object::{Cap, FsObj};
use core_types::{DirEntry, Errno, ObjectKind, StatInfo};
use std::cmp::Ordering;
use std::os::fd::OwnedFd;
use std::rc::Rc;

pub struct UnionDir {
    first: Cap,
    second: Cap,
}

impl UnionDir {
    pub fn new(first: Cap, second: Cap) -> Self {
        Self { first, second }
    }

    pub fn new_cap(first: Cap, second: Cap) -> Cap {
        Rc::new(Self::new(first, second))
    }
}

fn is_dir(obj: &Cap) -> Result<bool, Errno> {
    Ok(obj.obj_type()? == ObjectKind::Dir)
}

/// Merges two listings, keeping one entry per name
///
/// Both listings are sorted by raw name bytes and merged; on a name clash
/// the entry from `first` is kept.
pub fn merge_listings(mut first: Vec<DirEntry>, mut second: Vec<DirEntry>) -> Vec<DirEntry> {
    first.sort_by(|a, b| a.name.cmp(&b.name));
    first.dedup_by(|a, b| a.name == b.name);
    second.sort_by(|a, b| a.name.cmp(&b.name));
    second.dedup_by(|a, b| a.name == b.name);

    let mut out = Vec::with_capacity(first.len() + second.len());
    let mut a = first.into_iter().peekable();
    let mut b = second.into_iter().peekable();
    loop {
        let order = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.name.cmp(&y.name),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Less => out.extend(a.next()),
            Ordering::Greater => out.extend(b.next()),
            Ordering::Equal => {
                out.extend(a.next());
                b.next();
            }
        }
    }
    out
}

impl FsObj for UnionDir {
    fn type_name(&self) -> &'static str {
        "union_dir"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::Dir)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        self.first.stat()
    }

    fn traverse(&self, name: &[u8]) -> Result<Cap, Errno> {
        let first = match self.first.traverse(name) {
            Ok(obj) => obj,
            Err(Errno::NoEnt) => return self.second.traverse(name),
            Err(err) => return Err(err),
        };
        if !is_dir(&first)? {
            return Ok(first);
        }
        match self.second.traverse(name) {
            Ok(second) if is_dir(&second)? => Ok(UnionDir::new_cap(first, second)),
            Ok(_) | Err(Errno::NoEnt) | Err(Errno::NotDir) => Ok(first),
            Err(err) => Err(err),
        }
    }

    fn list(&self) -> Result<Vec<DirEntry>, Errno> {
        Ok(merge_listings(self.first.list()?, self.second.list()?))
    }

    fn create_file(&self, name: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno> {
        self.first.create_file(name, flags, mode)
    }

    fn mkdir(&self, name: &[u8], mode: u32) -> Result<(), Errno> {
        self.first.mkdir(name, mode)
    }

    fn symlink(&self, name: &[u8], target: &[u8]) -> Result<(), Errno> {
        self.first.symlink(name, target)
    }

    fn rename(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        self.first.rename(name, dest_dir, dest_name)
    }

    fn link(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        self.first.link(name, dest_dir, dest_name)
    }

    fn unlink(&self, name: &[u8]) -> Result<(), Errno> {
        self.first.unlink(name)
    }

    fn rmdir(&self, name: &[u8]) -> Result<(), Errno> {
        self.first.rmdir(name)
    }

    fn socket_bind(&self, name: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        self.first.socket_bind(name, sock)
    }

    fn write_target(&self, name: &[u8]) -> Result<Option<(Cap, Vec<u8>)>, Errno> {
        Ok(Some((self.first.clone(), name.to_vec())))
    }
}
