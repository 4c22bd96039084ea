//! Fabricated objects
//!
//! In-memory directories and symlinks that exist only inside a namespace.
//! A fabricated directory is an immutable table of entries; an entry is
//! either an object or a [`Slot`], which forwards to a name in some other
//! directory so the name can be created, replaced or removed there.

use crate::object::{check_name, Cap, FsObj};
use core_types::{DirEntry, Errno, ObjectKind, StatInfo};
use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU64, Ordering};

/// Device number reported by fabricated objects
pub const FAB_DEV: u64 = 0x1000;

static NEXT_INO: AtomicU64 = AtomicU64::new(1);

fn next_ino() -> u64 {
    NEXT_INO.fetch_add(1, Ordering::Relaxed)
}

/// The right to a name in a directory, whether or not it exists yet
#[derive(Clone)]
pub struct Slot {
    pub dir: Cap,
    pub leaf: Vec<u8>,
}

impl Slot {
    pub fn new(dir: Cap, leaf: impl Into<Vec<u8>>) -> Self {
        Self {
            dir,
            leaf: leaf.into(),
        }
    }

    /// The object currently occupying the slot
    pub fn get(&self) -> Result<Cap, Errno> {
        self.dir.traverse(&self.leaf)
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("dir", &self.dir.type_name())
            .field("leaf", &String::from_utf8_lossy(&self.leaf))
            .finish()
    }
}

/// An entry of a fabricated directory
#[derive(Clone)]
pub enum FabEntry {
    Obj(Cap),
    Slot(Slot),
}

/// An immutable in-memory directory
pub struct FabDir {
    ino: u64,
    entries: BTreeMap<Vec<u8>, FabEntry>,
}

impl FabDir {
    pub fn new() -> Self {
        Self {
            ino: next_ino(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &[u8], obj: Cap) {
        self.entries.insert(name.to_vec(), FabEntry::Obj(obj));
    }

    pub fn insert_slot(&mut self, name: &[u8], slot: Slot) {
        self.entries.insert(name.to_vec(), FabEntry::Slot(slot));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the slot bound at `name`; plain objects and missing names
    /// cannot be written through this directory
    fn slot(&self, name: &[u8]) -> Result<&Slot, Errno> {
        match self.entries.get(name) {
            Some(FabEntry::Slot(slot)) => Ok(slot),
            Some(FabEntry::Obj(_)) | None => Err(Errno::Access),
        }
    }
}

impl Default for FabDir {
    fn default() -> Self {
        Self::new()
    }
}

impl FsObj for FabDir {
    fn type_name(&self) -> &'static str {
        "fab_dir"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::Dir)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        Ok(StatInfo::fabricated(
            FAB_DEV,
            self.ino,
            libc::S_IFDIR | 0o555,
        ))
    }

    fn traverse(&self, name: &[u8]) -> Result<Cap, Errno> {
        match self.entries.get(name) {
            Some(FabEntry::Obj(obj)) => Ok(obj.clone()),
            Some(FabEntry::Slot(slot)) => slot.get(),
            None => Err(Errno::NoEnt),
        }
    }

    fn list(&self) -> Result<Vec<DirEntry>, Errno> {
        let mut out = Vec::with_capacity(self.entries.len());
        for (name, entry) in &self.entries {
            match entry {
                FabEntry::Obj(obj) => {
                    let ino = obj.stat().map(|st| st.ino).unwrap_or(0);
                    out.push(DirEntry::new(name.clone(), ino, libc::DT_UNKNOWN));
                }
                // Empty slots are not listed.
                FabEntry::Slot(slot) => {
                    if let Ok(obj) = slot.get() {
                        let ino = obj.stat().map(|st| st.ino).unwrap_or(0);
                        out.push(DirEntry::new(name.clone(), ino, libc::DT_UNKNOWN));
                    }
                }
            }
        }
        Ok(out)
    }

    fn create_file(&self, name: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno> {
        let slot = self.slot(name)?;
        slot.dir.create_file(&slot.leaf, flags, mode)
    }

    fn mkdir(&self, name: &[u8], mode: u32) -> Result<(), Errno> {
        let slot = self.slot(name)?;
        slot.dir.mkdir(&slot.leaf, mode)
    }

    fn symlink(&self, name: &[u8], target: &[u8]) -> Result<(), Errno> {
        let slot = self.slot(name)?;
        slot.dir.symlink(&slot.leaf, target)
    }

    fn rename(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        let slot = self.slot(name)?;
        slot.dir.rename(&slot.leaf, dest_dir, dest_name)
    }

    fn link(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        let slot = self.slot(name)?;
        slot.dir.link(&slot.leaf, dest_dir, dest_name)
    }

    fn unlink(&self, name: &[u8]) -> Result<(), Errno> {
        let slot = self.slot(name)?;
        slot.dir.unlink(&slot.leaf)
    }

    fn rmdir(&self, name: &[u8]) -> Result<(), Errno> {
        let slot = self.slot(name)?;
        slot.dir.rmdir(&slot.leaf)
    }

    fn socket_bind(&self, name: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        let slot = self.slot(name)?;
        slot.dir.socket_bind(&slot.leaf, sock)
    }

    fn write_target(&self, name: &[u8]) -> Result<Option<(Cap, Vec<u8>)>, Errno> {
        check_name(name)?;
        let slot = self.slot(name)?;
        Ok(Some((slot.dir.clone(), slot.leaf.clone())))
    }
}

/// An in-memory symlink
pub struct FabSymlink {
    ino: u64,
    target: Vec<u8>,
}

impl FabSymlink {
    pub fn new(target: Vec<u8>) -> Self {
        Self {
            ino: next_ino(),
            target,
        }
    }
}

impl FsObj for FabSymlink {
    fn type_name(&self) -> &'static str {
        "fab_symlink"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::Symlink)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        let mut stat = StatInfo::fabricated(FAB_DEV, self.ino, libc::S_IFLNK | 0o777);
        stat.size = self.target.len() as i64;
        Ok(stat)
    }

    fn readlink(&self) -> Result<Vec<u8>, Errno> {
        Ok(self.target.clone())
    }
}
