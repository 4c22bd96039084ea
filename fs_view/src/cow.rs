//! Copy-on-write directory
//!
//! Layers a writable directory over an immutable read layer. Subdirectories
//! that only exist in the read layer get a node with no write layer yet; the
//! first mutation below such a node creates the missing directories in the
//! write layer (copying permission bits, never contents) and then applies
//! the mutation there.
//!
//! Names present in the read layer can never be removed or replaced.

use crate::object::{Cap, FsObj};
use crate::read_only::ReadOnlyProxy;
use crate::union::merge_listings;
use core_types::{DirEntry, Errno, ObjectKind, StatInfo, Timespec};
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::rc::{Rc, Weak};
use tracing::debug;

struct CowNode {
    write: RefCell<Option<Cap>>,
    read: Cap,
    /// Parent node and our name in it; `None` only for the top node, whose
    /// write layer always exists
    parent: Option<(Rc<CowNode>, Vec<u8>)>,
    /// Live child nodes, so repeated lookups share one node
    children: RefCell<HashMap<Vec<u8>, Weak<CowNode>>>,
}

impl CowNode {
    fn realize(&self) -> Result<Cap, Errno> {
        if let Some(write) = self.write.borrow().as_ref() {
            return Ok(write.clone());
        }
        let (parent, name) = self.parent.as_ref().ok_or(Errno::Io)?;
        let parent_write = parent.realize()?;
        let mode = self.read.stat()?.mode & 0o7777;
        match parent_write.mkdir(name, mode) {
            Ok(()) | Err(Errno::Exist) => {}
            Err(err) => return Err(err),
        }
        let write = parent_write.traverse(name)?;
        if write.obj_type()? != ObjectKind::Dir {
            return Err(Errno::NotDir);
        }
        debug!(name = %String::from_utf8_lossy(name), "Realized copy-on-write directory");
        *self.write.borrow_mut() = Some(write.clone());
        Ok(write)
    }

    fn write_layer(&self) -> Option<Cap> {
        self.write.borrow().clone()
    }

    fn read_has(&self, name: &[u8]) -> Result<bool, Errno> {
        match self.read.traverse(name) {
            Ok(_) => Ok(true),
            Err(Errno::NoEnt) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn child(&self, name: &[u8]) -> Option<Rc<CowNode>> {
        self.children.borrow().get(name).and_then(Weak::upgrade)
    }
}

/// A copy-on-write directory capability
pub struct CowDir(Rc<CowNode>);

impl CowDir {
    /// Builds a copy-on-write view over `read`, writing into `write`
    pub fn new(write: Cap, read: Cap) -> Self {
        Self(Rc::new(CowNode {
            write: RefCell::new(Some(write)),
            read,
            parent: None,
            children: RefCell::new(HashMap::new()),
        }))
    }

    pub fn new_cap(write: Cap, read: Cap) -> Cap {
        Rc::new(Self::new(write, read))
    }

    /// Whether this node has a directory in the write layer yet
    pub fn is_realized(&self) -> bool {
        self.0.write.borrow().is_some()
    }

    fn make_child(&self, name: &[u8], write: Option<Cap>, read: Cap) -> Cap {
        let node = Rc::new(CowNode {
            write: RefCell::new(write),
            read,
            parent: Some((self.0.clone(), name.to_vec())),
            children: RefCell::new(HashMap::new()),
        });
        let mut children = self.0.children.borrow_mut();
        children.retain(|_, child| child.strong_count() > 0);
        children.insert(name.to_vec(), Rc::downgrade(&node));
        Rc::new(CowDir(node))
    }

    /// Fails with `EPERM` when `name` exists in the read layer
    fn protect(&self, name: &[u8]) -> Result<(), Errno> {
        if self.0.read_has(name)? {
            return Err(Errno::Perm);
        }
        Ok(())
    }
}

fn lookup(dir: &Cap, name: &[u8]) -> Result<Option<Cap>, Errno> {
    match dir.traverse(name) {
        Ok(obj) => Ok(Some(obj)),
        Err(Errno::NoEnt) => Ok(None),
        Err(err) => Err(err),
    }
}

fn is_dir(obj: &Cap) -> Result<bool, Errno> {
    Ok(obj.obj_type()? == ObjectKind::Dir)
}

impl FsObj for CowDir {
    fn type_name(&self) -> &'static str {
        "cow_dir"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::Dir)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        match self.0.write_layer() {
            Some(write) => write.stat(),
            None => self.0.read.stat(),
        }
    }

    fn utimes(&self, atime: Timespec, mtime: Timespec) -> Result<(), Errno> {
        self.0.realize()?.utimes(atime, mtime)
    }

    fn chmod(&self, mode: u32) -> Result<(), Errno> {
        self.0.realize()?.chmod(mode)
    }

    fn traverse(&self, name: &[u8]) -> Result<Cap, Errno> {
        if let Some(child) = self.0.child(name) {
            return Ok(Rc::new(CowDir(child)));
        }

        let written = match self.0.write_layer() {
            Some(write) => lookup(&write, name)?,
            None => None,
        };
        let read = lookup(&self.0.read, name)?;

        match (written, read) {
            (Some(w), Some(r)) if is_dir(&w)? && is_dir(&r)? => {
                Ok(self.make_child(name, Some(w), r))
            }
            (Some(w), _) => Ok(w),
            (None, Some(r)) if is_dir(&r)? => Ok(self.make_child(name, None, r)),
            (None, Some(r)) => Ok(ReadOnlyProxy::wrap(r)),
            (None, None) => Err(Errno::NoEnt),
        }
    }

    fn list(&self) -> Result<Vec<DirEntry>, Errno> {
        let written = match self.0.write_layer() {
            Some(write) => write.list()?,
            None => Vec::new(),
        };
        Ok(merge_listings(written, self.0.read.list()?))
    }

    fn create_file(&self, name: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno> {
        if self.0.read_has(name)? {
            return Err(if flags & libc::O_EXCL != 0 {
                Errno::Exist
            } else {
                Errno::Perm
            });
        }
        self.0.realize()?.create_file(name, flags, mode)
    }

    fn mkdir(&self, name: &[u8], mode: u32) -> Result<(), Errno> {
        if self.0.read_has(name)? {
            return Err(Errno::Exist);
        }
        self.0.realize()?.mkdir(name, mode)
    }

    fn symlink(&self, name: &[u8], target: &[u8]) -> Result<(), Errno> {
        if self.0.read_has(name)? {
            return Err(Errno::Exist);
        }
        self.0.realize()?.symlink(name, target)
    }

    fn rename(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        self.protect(name)?;
        match self.0.write_layer() {
            Some(write) => write.rename(name, dest_dir, dest_name),
            None => Err(Errno::NoEnt),
        }
    }

    fn link(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        // A hard link to a read-layer file would make it writable.
        if self.0.read_has(name)? {
            return Err(Errno::XDev);
        }
        match self.0.write_layer() {
            Some(write) => write.link(name, dest_dir, dest_name),
            None => Err(Errno::NoEnt),
        }
    }

    fn unlink(&self, name: &[u8]) -> Result<(), Errno> {
        self.protect(name)?;
        match self.0.write_layer() {
            Some(write) => write.unlink(name),
            None => Err(Errno::NoEnt),
        }
    }

    fn rmdir(&self, name: &[u8]) -> Result<(), Errno> {
        self.protect(name)?;
        match self.0.write_layer() {
            Some(write) => write.rmdir(name),
            None => Err(Errno::NoEnt),
        }
    }

    fn socket_bind(&self, name: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        if self.0.read_has(name)? {
            return Err(Errno::AddrInUse);
        }
        self.0.realize()?.socket_bind(name, sock)
    }

    fn write_target(&self, name: &[u8]) -> Result<Option<(Cap, Vec<u8>)>, Errno> {
        self.protect(name)?;
        Ok(Some((self.0.realize()?, name.to_vec())))
    }
}
